use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;

lazy_static! {
    // Simulated microseconds, one counter per test so tests can run in parallel.
    static ref SIMULATED_TIMES: Mutex<HashMap<&'static str, u32>> = Mutex::new(HashMap::new());
}

pub fn reset_time(name: &'static str) {
    let mut times = SIMULATED_TIMES.lock().unwrap();
    times.insert(name, 0);
}

pub fn set_time(name: &str, time: u32) {
    let mut times = SIMULATED_TIMES.lock().unwrap();
    *times.get_mut(name).unwrap() = time;
}

pub fn time(name: &str) -> u32 {
    let times = SIMULATED_TIMES.lock().unwrap();
    *times.get(name).unwrap()
}

/// Returns the current time, then moves it forward by 1us.
pub fn read_and_advance_time(name: &str) -> u32 {
    let mut times = SIMULATED_TIMES.lock().unwrap();
    let time = times.get_mut(name).unwrap();
    *time = time.wrapping_add(1);
    time.wrapping_sub(1)
}
