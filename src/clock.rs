//! Wall-clock timestamps without a calendar dependency: epoch seconds to
//! civil date via the usual days-from-era arithmetic.

use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
	pub year: u32,
	pub month: u32,
	pub day: u32,
	pub hour: u32,
	pub minute: u32,
	pub second: u32,
	pub millis: u32,
}

impl Stamp {
	pub fn now() -> Self {
		let elapsed = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or_default();
		Self::from_epoch_millis(elapsed.as_millis() as u64)
	}

	pub fn from_epoch_millis(ms: u64) -> Self {
		let secs = ms / 1000;
		let time_of_day = secs % 86400;
		let days = (secs / 86400) as i64;

		let z = days + 719468;
		let era = if z >= 0 { z } else { z - 146096 } / 146097;
		let doe = (z - era * 146097) as u32;
		let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
		let y = yoe as i64 + era * 400;
		let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
		let mp = (5 * doy + 2) / 153;
		let day = doy - (153 * mp + 2) / 5 + 1;
		let month = if mp < 10 { mp + 3 } else { mp - 9 };
		let year = if month <= 2 { y + 1 } else { y };

		Self {
			year: year as u32,
			month,
			day,
			hour: (time_of_day / 3600) as u32,
			minute: ((time_of_day % 3600) / 60) as u32,
			second: (time_of_day % 60) as u32,
			millis: (ms % 1000) as u32,
		}
	}
}

/// Renders a stamp with `yyyy`/`MM`/`dd`/`HH`/`mm`/`ss`/`fff` tokens; any
/// other character run is copied through verbatim.
pub fn format(pattern: &str, stamp: Stamp) -> String {
	let mut out = String::with_capacity(pattern.len() + 8);
	let chars: Vec<char> = pattern.chars().collect();
	let mut i = 0;
	while i < chars.len() {
		let c = chars[i];
		let mut run = 1;
		while i + run < chars.len() && chars[i + run] == c {
			run += 1;
		}
		match (c, run) {
			('y', 4) => out.push_str(&format!("{:04}", stamp.year)),
			('M', 2) => out.push_str(&format!("{:02}", stamp.month)),
			('d', 2) => out.push_str(&format!("{:02}", stamp.day)),
			('H', 2) => out.push_str(&format!("{:02}", stamp.hour)),
			('m', 2) => out.push_str(&format!("{:02}", stamp.minute)),
			('s', 2) => out.push_str(&format!("{:02}", stamp.second)),
			('f', 3) => out.push_str(&format!("{:03}", stamp.millis)),
			_ => {
				for _ in 0..run {
					out.push(c);
				}
			}
		}
		i += run;
	}
	out
}
