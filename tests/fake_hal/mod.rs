#![allow(dead_code)]

mod concurrent;
pub mod digital;
pub mod tunable;

/// A simulated microsecond clock that advances by 1us every time it is read.
///
/// It shares its time with any [`digital::Pin`] created under the same name, so the pin's level
/// follows the driver's own busy loops.
pub fn clock(name: &'static str) -> impl Fn() -> u32 {
    move || concurrent::read_and_advance_time(name)
}

/// The current simulated time of `name`, without advancing it.
pub fn now(name: &'static str) -> u32 {
    concurrent::time(name)
}

/// Jumps the simulated time of `name`, as if the line had been left alone until then.
pub fn set_now(name: &'static str, time: u32) {
    concurrent::set_time(name, time);
}
