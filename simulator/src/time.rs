use bevy::prelude::ResMut;
use binaura_core::Clock;
use tracing::trace;

pub(crate) fn advance_clock(mut clock: ResMut<Clock>) {
    clock.tick += 1;
    // derive time from the tick count so long runs do not accumulate
    // floating-point drift
    clock.time = clock.tick as f64 * clock.dt;
    trace!(tick = clock.tick, time = clock.time, "tick complete");
}
