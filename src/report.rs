//! Human-readable and JSON renderings of a [`RunSummary`].

use std::fmt::Write as _;
use std::path::Path;

use crate::stats::RunSummary;

impl RunSummary {
    /// Text report: averages, totals, then the failed calls.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let avg = &self.averages;

        let _ = writeln!(out);
        let _ = writeln!(out, "Average Response Time (sec): {:.4}", avg.response_time);
        let _ = writeln!(out, "Average Latency (sec): {:.4}", avg.latency);
        let _ = writeln!(out, "Average First Byte Time (sec): {:.4}", avg.first_byte_time);
        let _ = writeln!(out, "Total Devices Processed: {}", self.devices_processed);
        let _ = writeln!(out, "Total Devices with Errors: {}", self.device_errors);
        if self.devices_aborted > 0 {
            let _ = writeln!(out, "Devices Aborted (re-authentication failed): {}", self.devices_aborted);
        }
        let _ = writeln!(out, "Total API Calls Made: {}", self.api_calls);
        let _ = writeln!(out, "Total API Call Errors: {}", self.api_call_errors);
        let _ = writeln!(out, "Re-authentications: {}", self.reauthentications);
        if self.sink_failures > 0 {
            let _ = writeln!(out, "Metrics Write Failures: {}", self.sink_failures);
        }
        let _ = writeln!(out, "Total Time Taken: {:.2} seconds", self.elapsed.as_secs_f64());

        let _ = writeln!(out);
        if self.failures.is_empty() {
            let _ = writeln!(out, "All devices responded with 200 OK");
        } else {
            let _ = writeln!(out, "Devices with Non-200 Status Codes:");
            for failure in &self.failures {
                let _ = writeln!(
                    out,
                    "  • {} [{}] → {}",
                    failure.device_id, failure.operation, failure.status
                );
            }
        }
        out
    }

    pub fn print_report(&self) {
        print!("{}", self.render());
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.to_json())
    }
}
