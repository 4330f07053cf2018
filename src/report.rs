use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{DataStats, RecentInsight};

fn share(count: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

pub fn average_confidence(insights: &[RecentInsight]) -> Option<f64> {
    if insights.is_empty() {
        return None;
    }
    let total: f64 = insights.iter().map(|insight| insight.confidence).sum();
    Some(total / insights.len() as f64)
}

pub fn build_report(stats: &DataStats, recent: &[RecentInsight], generated_on: NaiveDate) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Insight Pipeline Report");
    let _ = writeln!(output, "Generated on {}", generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Raw records: {}", stats.total_records);
    let _ = writeln!(
        output,
        "- Processed: {} ({:.1}%)",
        stats.processed_records,
        share(stats.processed_records, stats.total_records)
    );
    let _ = writeln!(output, "- Pending: {}", stats.pending_records());
    let _ = writeln!(output, "- Insights generated: {}", stats.total_insights);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Source Mix");

    if stats.by_source_type.is_empty() {
        let _ = writeln!(output, "No raw records stored yet.");
    } else {
        for entry in stats.by_source_type.iter() {
            let _ = writeln!(
                output,
                "- {}: {} records ({:.1}%)",
                entry.source_type,
                entry.count,
                share(entry.count, stats.total_records)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Insights");

    if recent.is_empty() {
        let _ = writeln!(output, "No insights generated yet.");
    } else {
        if let Some(average) = average_confidence(recent) {
            let _ = writeln!(output, "Average confidence {:.2} across {} insights.", average, recent.len());
            let _ = writeln!(output);
        }
        for insight in recent {
            let _ = writeln!(
                output,
                "- [{}] {} (confidence {:.2}, {}, {})",
                insight.source_type,
                insight.text,
                insight.confidence,
                insight.category_label,
                insight.generated_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    output
}
