use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ndarray::Axis;
use sensorlink_session::message::array_to_json;
use sensorlink_session::FrameBatch;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct BatchOutput<'a> {
    kind: &'static str,
    poll: u64,
    samples: usize,
    shape: &'a [usize],
    timestamps: &'a [f64],
    messages: &'a [String],
    data: serde_json::Value,
}

/// Why a stream run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Iterations,
    Interrupted,
    DriverEvent,
}

impl StopReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Iterations => "iteration limit reached",
            Self::Interrupted => "interrupted",
            Self::DriverEvent => "driver event",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StreamSummary {
    pub kind: &'static str,
    pub device: String,
    pub polls: u64,
    pub samples: u64,
    pub messages: Vec<String>,
    pub dropped: u64,
    pub reason: StopReason,
}

pub fn print_batch(batch: &FrameBatch, poll: u64, channel_names: &[String], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = BatchOutput {
                kind: "batch",
                poll,
                samples: batch.sample_count(),
                shape: batch.data.shape(),
                timestamps: &batch.timestamps,
                messages: &batch.messages,
                data: array_to_json(batch.data.view()),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            if !batch.is_empty() {
                println!("{}", batch_table(batch, channel_names));
            }
            for message in &batch.messages {
                println!("event: {message}");
            }
        }
        OutputFormat::Pretty => {
            println!(
                "poll={} samples={} shape={:?} t=[{}] messages={:?}",
                poll,
                batch.sample_count(),
                batch.data.shape(),
                clock_range(&batch.timestamps),
                batch.messages
            );
        }
    }
}

pub fn print_summary(summary: &StreamSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(summary).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!(
                "{}: {} samples in {} polls, {} dropped ({})",
                summary.device,
                summary.samples,
                summary.polls,
                summary.dropped,
                summary.reason.as_str()
            );
        }
    }
}

/// One row per channel: name, sample count and the latest reading.
fn batch_table(batch: &FrameBatch, channel_names: &[String]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["CHANNEL", "SAMPLES", "LAST", "TIME"]);

    let last_clock = batch
        .timestamps
        .last()
        .map(|t| format!("{t:.3}"))
        .unwrap_or_default();

    if batch.channel_count().is_none() {
        table.add_row(vec![
            format!("shape {:?}", batch.data.shape()),
            batch.sample_count().to_string(),
            String::new(),
            last_clock,
        ]);
        return table;
    }

    for (index, row) in batch.data.axis_iter(Axis(0)).enumerate() {
        let name = channel_names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("#{index}"));
        let last = row.iter().last().map(|v| format!("{v:.4}")).unwrap_or_default();
        table.add_row(vec![
            name,
            batch.sample_count().to_string(),
            last,
            last_clock.clone(),
        ]);
    }
    table
}

fn clock_range(timestamps: &[f64]) -> String {
    match (timestamps.first(), timestamps.last()) {
        (Some(first), Some(last)) => format!("{first:.3}..{last:.3}"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use super::*;

    fn batch() -> FrameBatch {
        FrameBatch {
            data: arr2(&[[1.0, 3.0], [2.0, 4.0]]).into_dyn(),
            timestamps: vec![100.0, 101.0],
            messages: vec!["fault".to_string()],
        }
    }

    #[test]
    fn batch_json_carries_data_and_shape() {
        let batch = batch();
        let out = BatchOutput {
            kind: "batch",
            poll: 3,
            samples: batch.sample_count(),
            shape: batch.data.shape(),
            timestamps: &batch.timestamps,
            messages: &batch.messages,
            data: array_to_json(batch.data.view()),
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["shape"], serde_json::json!([2, 2]));
        assert_eq!(json["data"], serde_json::json!([[1.0, 3.0], [2.0, 4.0]]));
        assert_eq!(json["messages"], serde_json::json!(["fault"]));
    }

    #[test]
    fn table_has_one_row_per_channel() {
        let names = vec!["Fp1".to_string(), "F7".to_string()];
        let rendered = batch_table(&batch(), &names).to_string();
        assert!(rendered.contains("Fp1"));
        assert!(rendered.contains("F7"));
        assert!(rendered.contains("4.0000"));
    }

    #[test]
    fn summary_reason_serializes_snake_case() {
        let summary = StreamSummary {
            kind: "summary",
            device: "bench".to_string(),
            polls: 1,
            samples: 2,
            messages: Vec::new(),
            dropped: 0,
            reason: StopReason::DriverEvent,
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"reason\":\"driver_event\""));
    }

    #[test]
    fn clock_range_is_empty_without_samples() {
        assert_eq!(clock_range(&[]), "");
        assert_eq!(clock_range(&[1.0, 2.5]), "1.000..2.500");
    }
}
