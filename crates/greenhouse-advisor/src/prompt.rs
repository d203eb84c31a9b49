use std::fmt::Write;

use greenhouse_common::Reading;

/// Persona for the advice assistant.
pub const SYSTEM_PROMPT: &str = "You are an expert greenhouse assistant. Given the following sensor \
readings and plant type, provide actionable advice for optimal plant health. Be concise and \
practical. You are talking to a farmer who is likely not very technical, so keep the language \
friendly and easy to understand without sacrificing accuracy. Do not use rich text formatting \
in your responses.";

/// Line emitted instead of the reading list when there is nothing to report.
pub const NO_READINGS_MARKER: &str = "No recent sensor readings available.";

const CLOSING_QUESTION: &str =
    "What advice do you have for optimal care of this plant, given these readings?";

/// Render the user prompt for `plant`.
///
/// Readings are listed in the order given; sorting is the caller's job.
pub fn build(plant: &str, readings: &[Reading]) -> String {
    let mut out = String::with_capacity(128 + readings.len() * 40);
    // Writing into a String cannot fail.
    let _ = writeln!(out, "Plant: {plant}");

    if readings.is_empty() {
        let _ = writeln!(out, "{NO_READINGS_MARKER}");
    } else {
        let _ = writeln!(out, "Recent sensor readings ({} readings):", readings.len());
        for r in readings {
            let _ = writeln!(
                out,
                "- {}: {:.1} ({})",
                r.sensor_type,
                r.value,
                r.timestamp.format("%H:%M")
            );
        }
    }

    out.push('\n');
    out.push_str(CLOSING_QUESTION);
    out
}
