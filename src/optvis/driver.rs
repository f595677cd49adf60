// Host-facing loop driver. The engine itself only exposes `tick`; a browser
// host would call it once per animation frame so the event loop stays
// responsive. `run_with` is that loop with an explicit yield hook, and
// `run_to_completion` is the synchronous variant used by tests and the demo
// binary.
//
// Cancellation stays cooperative: `stop_optimization` zeroes the remaining
// iteration counter, and the next tick winds the run down through its
// callbacks instead of stepping.

use crate::error::VisError;
use crate::optvis::renderer::{Renderer, TickOutcome};

/// Repeatedly tick the engine, invoking `yield_fn` between iterations (where
/// a real host would return to its scheduler). Returns the number of
/// iterations that ran.
pub fn run_with(
    renderer: &mut Renderer,
    mut yield_fn: impl FnMut(),
) -> Result<usize, VisError> {
    let mut steps = 0;
    loop {
        match renderer.tick()? {
            TickOutcome::Idle | TickOutcome::Finished => return Ok(steps),
            TickOutcome::Stepped { .. } => {
                steps += 1;
                yield_fn();
            }
        }
    }
}

/// Drive an armed run until it finishes.
pub fn run_to_completion(renderer: &mut Renderer) -> Result<usize, VisError> {
    run_with(renderer, || {})
}
