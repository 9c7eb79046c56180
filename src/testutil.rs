// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::{
    thread,
    time::{Duration, Instant},
};

use crate::buffer::AudioSampleBuffer;

/// The bank used throughout the tests. Same events as the embedded bank.
pub const TEST_BANK: &str = r#"
name: Modded
events:
  - path: "event:/2D action"
    id: "{2e2adb70-14df-4219-bb0d-b5c6ffd8fd4f}"
  - path: "event:/3D action"
    id: "{6ced009f-0452-428d-9d94-994ae51660fc}"
    is_3d: true
"#;

/// Wait for the given predicate to return true or fail.
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    let mut tick = Duration::from_millis(5);
    let timeout = Duration::from_secs(10);
    let max_tick = Duration::from_millis(100);

    loop {
        if start.elapsed() > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }

        thread::sleep(tick);
        tick = std::cmp::min(tick * 2, max_tick);
    }
}

/// A mono buffer whose samples count up from `start` in steps of 1/1024, so any
/// reordering or truncation is visible.
pub fn ramp_buffer(name: &str, start: usize, sample_count: usize) -> AudioSampleBuffer {
    let samples = (start..start + sample_count)
        .map(|i| (i % 1024) as f32 / 1024.0)
        .collect();
    AudioSampleBuffer::new(name, sample_count, 1, 44100, samples).unwrap()
}

/// The four sample mono buffer used by the end to end scenarios.
pub fn scenario_buffer() -> AudioSampleBuffer {
    AudioSampleBuffer::new("scenario", 4, 1, 44100, vec![0.1, -0.2, 0.3, -0.4]).unwrap()
}
