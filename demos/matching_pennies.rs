use nnkit::{BernoulliBandit, NormalFormGame, NormalFormGameSolver, UcbSolver};

fn main() -> nnkit::Result<()> {
    // Player 0 wins on a match, player 1 on a mismatch.
    let pennies = NormalFormGame::new(&[2, 2], |p, a| {
        let matched = a[0] == a[1];
        if matched == (p == 0) { 1.0 } else { -1.0 }
    })?;

    let mut solver = NormalFormGameSolver::with_seed(&pennies, 0);
    let fictitious = solver.fictitious_play(5_000);
    let smoothed = solver.distribution_expectation(5_000);
    let ascent = solver.gradient_ascent(5_000, 0.05)?;
    println!("fictitious play:          {fictitious:?}");
    println!("distribution expectation: {smoothed:?}");
    println!("gradient ascent:          {ascent:?}");
    println!("expected rewards (fp):    {:?}", pennies.expected_rewards(&fictitious)?);

    let bandit = BernoulliBandit::new(&[0.3, 0.5, 0.7])?;
    let mut ucb = UcbSolver::with_seed(&bandit, 0);
    let history = ucb.ucb(2_000, 1.0)?;
    let average = ucb.average_regret(&history)?;
    println!(
        "ucb: best arm {} average regret after {} pulls {}",
        ucb.optimal_action()?,
        history.len(),
        average[history.len() - 1]
    );
    Ok(())
}
