use nnkit::{
    BernoulliBandit, Error, FiniteMdp, FiniteMdpSimulator, FiniteMdpSolver, Mdp, MdpSimulator,
    MdpSolver, NormalFormGame, NormalFormGameSolver, Outcome, Simplex, UcbSolver,
};

/// Action 0 stays put, action 1 swaps; staying in state 1 or leaving state 0 pays 1.
fn swap_mdp() -> Mdp {
    let reward = [[0.0, 1.0], [1.0, 0.0]];
    Mdp::new(
        2,
        2,
        0.9,
        |s, a, _| reward[s][a],
        |s| if s == 0 { 1.0 } else { 0.0 },
        |s, a, next| {
            let target = if a == 0 { s } else { 1 - s };
            if next == target { 1.0 } else { 0.0 }
        },
    )
    .unwrap()
}

#[test]
fn textbook_linear_program() {
    let mut lp = Simplex::new(2).unwrap();
    lp.subject_to(&[1.0, 2.0, 4.0]).unwrap();
    lp.subject_to(&[3.0, 2.0, 6.0]).unwrap();
    lp.maximize(&[1.0, 1.0]).unwrap();
    assert!(lp.solve().unwrap());

    assert!((lp.value().unwrap() - 2.5).abs() < 1e-9);
    let x = lp.parameters().unwrap();
    assert!((x[0] - 1.0).abs() < 1e-9 && (x[1] - 1.5).abs() < 1e-9, "{x:?}");
    assert!(x[0] + 2.0 * x[1] <= 4.0 + 1e-9);
    assert!(3.0 * x[0] + 2.0 * x[1] <= 6.0 + 1e-9);
}

#[test]
fn infeasible_and_unbounded_programs() {
    let mut lp = Simplex::new(1).unwrap();
    lp.subject_to(&[1.0, 1.0]).unwrap();
    lp.subject_to_ge(&[1.0, 2.0]).unwrap();
    lp.maximize(&[1.0]).unwrap();
    assert!(!lp.solve().unwrap());
    assert_eq!(lp.outcome(), Some(&Outcome::Infeasible));
    assert!(matches!(lp.value(), Err(Error::NotSolved(_))));

    let mut lp = Simplex::new(2).unwrap();
    lp.subject_to(&[1.0, -1.0, 1.0]).unwrap();
    lp.maximize(&[1.0, 0.0]).unwrap();
    assert!(!lp.solve().unwrap());
    assert!(lp.is_unbounded().unwrap());
}

#[test]
fn two_state_mdp_is_solved_by_every_method() {
    let mdp = swap_mdp();
    let mut solver = MdpSolver::with_seed(&mdp, 0);

    let policy = solver.value_iteration(400).unwrap();
    assert_eq!(policy, vec![1, 0]);
    let value = solver.value(&policy).unwrap();
    for v in &value {
        assert!((v - 10.0).abs() < 1e-8, "{value:?}");
    }
    assert!((solver.expected_value(&value).unwrap() - 10.0).abs() < 1e-8);

    // The optimal value is a fixed point of the Bellman operator.
    let backed_up = solver.bellman_update(&value).unwrap();
    for (u, v) in backed_up.iter().zip(&value) {
        assert!((u - v).abs() < 1e-9);
    }

    assert_eq!(solver.policy_iteration(10).unwrap(), vec![1, 0]);
    assert_eq!(solver.primal_lp().unwrap(), vec![1, 0]);
    assert_eq!(solver.dual_lp().unwrap(), vec![1, 0]);
}

#[test]
fn simulated_return_follows_the_optimal_policy() {
    let mdp = swap_mdp();
    let mut sim = MdpSimulator::with_seed(&mdp, 3).unwrap();
    assert_eq!(sim.state(), 0);

    sim.simulate(&[1, 0], 50).unwrap();
    assert_eq!(sim.state_trajectory().len(), 51);
    assert!(sim.reward_trajectory().iter().all(|&r| r == 1.0));
    let expected = (1.0 - 0.9f64.powi(50)) / (1.0 - 0.9);
    assert!((sim.discounted_return() - expected).abs() < 1e-9);
}

#[test]
fn one_step_backward_induction_is_greedy() {
    let payoff = [1.0, 2.5, 0.5];
    let mdp =
        FiniteMdp::new(1, 1, 3, |_, _, a, _| payoff[a], |_| 1.0, |_, _, _, _| 1.0).unwrap();
    let mut solver = FiniteMdpSolver::with_seed(&mdp, 0);
    let policy = solver.backward_induction().unwrap();
    assert_eq!(policy, vec![vec![1]]);
    let value = solver.value(&policy).unwrap();
    assert_eq!(value[(0, 0)], 2.5);
    assert_eq!(solver.expected_value(&value).unwrap(), 2.5);
}

#[test]
fn estimated_model_recovers_a_deterministic_chain() {
    // Two states; action 1 moves to state 1 and pays 1 from there.
    let mdp = FiniteMdp::new(
        3,
        2,
        2,
        |_, s, _, _| if s == 1 { 1.0 } else { 0.0 },
        |s| if s == 0 { 1.0 } else { 0.0 },
        |_, s, a, next| {
            let target = if a == 1 { 1 } else { s };
            if next == target { 1.0 } else { 0.0 }
        },
    )
    .unwrap();
    let mut solver = FiniteMdpSolver::with_seed(&mdp, 1);
    let policy = solver.backward_induction().unwrap();
    let true_value = solver.value(&policy).unwrap();
    assert_eq!(true_value[(0, 0)], 2.0);

    let mut sim = FiniteMdpSimulator::with_seed(&mdp, 1);
    let episodes = sim.episodes(&policy, 5).unwrap();
    assert_eq!(episodes.len(), 5);
    let estimate = episodes.estimate(3, 2, 2).unwrap();
    let estimated_solver = FiniteMdpSolver::with_seed(&estimate, 1);
    let estimated_value = estimated_solver.value(&policy).unwrap();
    assert_eq!(estimated_value[(0, 0)], 2.0);
}

#[test]
fn games_and_bandits_smoke() {
    let payoff = [[3.0, 0.0], [5.0, 1.0]];
    let dilemma = NormalFormGame::new(&[2, 2], |p, a| payoff[a[p]][a[1 - p]]).unwrap();
    let mut solver = NormalFormGameSolver::with_seed(&dilemma, 7);
    let profile = solver.fictitious_play(20);
    assert_eq!(profile, vec![vec![0.0, 1.0], vec![0.0, 1.0]]);
    assert_eq!(dilemma.expected_rewards(&profile).unwrap(), vec![1.0, 1.0]);

    let bandit = BernoulliBandit::new(&[0.2, 0.8]).unwrap();
    let mut ucb = UcbSolver::with_seed(&bandit, 7)
        .with_means(vec![0.2, 0.8])
        .unwrap();
    let history = ucb.ucb(500, 1.0).unwrap();
    let total = ucb.total_regret(&history).unwrap();
    assert!(total[499] < 50.0, "total regret {}", total[499]);
}
