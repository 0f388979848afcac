use nnkit::{Mdp, MdpSimulator, MdpSolver};

const WIDTH: usize = 4;

fn main() -> nnkit::Result<()> {
    // A 1x4 corridor. Action 0 moves left, action 1 moves right; the last cell pays 1
    // for every step spent in it.
    let mdp = Mdp::new(
        WIDTH,
        2,
        0.95,
        |s, _, _| if s == WIDTH - 1 { 1.0 } else { 0.0 },
        |s| if s == 0 { 1.0 } else { 0.0 },
        |s, a, next| {
            let target = match a {
                0 => s.saturating_sub(1),
                _ => (s + 1).min(WIDTH - 1),
            };
            if next == target { 1.0 } else { 0.0 }
        },
    )?;

    let mut solver = MdpSolver::with_seed(&mdp, 0);
    let by_value = solver.value_iteration(500)?;
    let by_policy = solver.policy_iteration(20)?;
    let by_primal = solver.primal_lp()?;
    let by_dual = solver.dual_lp()?;
    println!("value iteration:  {by_value:?}");
    println!("policy iteration: {by_policy:?}");
    println!("primal LP:        {by_primal:?}");
    println!("dual LP:          {by_dual:?}");

    let value = solver.value(&by_value)?;
    println!("V = {value:?}, expected = {}", solver.expected_value(&value)?);

    let mut sim = MdpSimulator::with_seed(&mdp, 0)?;
    sim.simulate(&by_value, 100)?;
    println!(
        "simulated states {:?}... discounted return {}",
        &sim.state_trajectory()[..8],
        sim.discounted_return()
    );
    Ok(())
}
