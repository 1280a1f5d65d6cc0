//! CSV emission of the aggregate table.

use std::io::{self, Write};

use crate::engine::AggregateRow;

/// The exact header consumed by the downstream plotting pipeline.
pub const HEADER: &str = "system,size,message,num_clients,median,avg,p99,tput,tputgbps,retries";

/// Writes the header and all rows to `out`.
///
/// Rows are written whole or not at all; a row that failed to aggregate
/// never makes it here.
pub fn write_table(out: &mut impl Write, rows: &[AggregateRow]) -> io::Result<()> {
    writeln!(out, "{HEADER}")?;
    for row in rows {
        writeln!(out, "{}", csv_line(row))?;
    }
    out.flush()
}

/// Formats one row in header order.
pub fn csv_line(row: &AggregateRow) -> String {
    let key = &row.key;
    format!(
        "{},{},{},{},{},{},{},{},{},{}",
        key.system,
        key.size,
        key.message.as_deref().unwrap_or("none"),
        key.num_clients,
        row.median_us,
        row.avg_us,
        row.p99_us,
        row.tput,
        row.tput_gbps,
        row.retries
    )
}

#[cfg(test)]
mod tests {
    use wirebench_types::key::ExperimentKey;

    use super::*;

    #[test]
    fn header_is_stable() {
        assert_eq!(
            HEADER,
            "system,size,message,num_clients,median,avg,p99,tput,tputgbps,retries"
        );
    }

    #[test]
    fn rows_follow_header_order() {
        let row = AggregateRow {
            key: ExperimentKey {
                system: "protobuf".into(),
                message: Some("Get".into()),
                size: 1024,
                num_clients: 4,
                trial: 0,
            },
            median_us: 8.192,
            avg_us: 12.0,
            p99_us: 24.0,
            tput: 333.3,
            tput_gbps: 2.73,
            retries: 4,
        };
        assert_eq!(
            csv_line(&row),
            "protobuf,1024,Get,4,8.192,12,24,333.3,2.73,4"
        );

        let mut out = Vec::new();
        write_table(&mut out, &[row]).unwrap();
        let written = String::from_utf8(out).unwrap();
        assert!(written.starts_with(HEADER));
        assert_eq!(written.lines().count(), 2);
    }
}
