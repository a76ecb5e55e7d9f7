//! SQL for capture hypertables
//!
//! Table names are interpolated into statements, so every builder takes an
//! identifier that already passed [`validate_identifier`].

use crate::capture::SensorProfile;
use crate::framework::copy_columns;

const MAX_IDENTIFIER_LEN: usize = 63;

pub const CHUNK_TIME_INTERVAL: &str = "30 days";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid table name '{0}': use letters, digits and '_', not starting with a digit, at most 63 characters")]
pub struct InvalidIdentifier(pub String);

pub fn validate_identifier(name: &str) -> Result<(), InvalidIdentifier> {
    let valid = !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(InvalidIdentifier(name.to_string()))
    }
}

pub const CREATE_EXTENSION: &str = "CREATE EXTENSION IF NOT EXISTS timescaledb";

pub fn create_table(table: &str, profile: &SensorProfile) -> String {
    let value_type = if profile.is_integer() {
        "INTEGER"
    } else {
        "DOUBLE PRECISION"
    };
    let channels = profile
        .channel_columns
        .iter()
        .map(|column| format!("    {} {} NOT NULL,\n", column, value_type))
        .collect::<String>();

    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    time TIMESTAMPTZ NOT NULL,\n    machine_id TEXT NOT NULL,\n{channels}    filename TEXT\n)"
    )
}

pub fn create_hypertable(table: &str) -> String {
    format!(
        "SELECT create_hypertable('{table}', 'time', chunk_time_interval => INTERVAL '{CHUNK_TIME_INTERVAL}', if_not_exists => TRUE)"
    )
}

pub fn enable_compression(table: &str) -> String {
    format!(
        "ALTER TABLE {table} SET (timescaledb.compress, timescaledb.compress_segmentby = 'machine_id', timescaledb.compress_orderby = 'time DESC')"
    )
}

pub fn set_autovacuum(table: &str, enabled: bool) -> String {
    format!(
        "ALTER TABLE {table} SET (autovacuum_enabled = {enabled}, toast.autovacuum_enabled = {enabled})"
    )
}

pub fn create_time_index(table: &str) -> String {
    format!("CREATE INDEX IF NOT EXISTS idx_{table}_machine_time ON {table} (machine_id, time DESC)")
}

pub fn vacuum_analyze(table: &str) -> String {
    format!("VACUUM ANALYZE {table}")
}

/// Chunk compression query; binds `$1` as the watermark when `bounded`
pub fn compress_chunks(table: &str, bounded: bool) -> String {
    if bounded {
        format!(
            "SELECT compress_chunk(c, if_not_compressed => true)::text FROM show_chunks('{table}', older_than => $1::timestamptz) c"
        )
    } else {
        format!("SELECT compress_chunk(c, if_not_compressed => true)::text FROM show_chunks('{table}') c")
    }
}

pub fn copy_statement(table: &str, profile: &SensorProfile) -> String {
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, DELIMITER E'\\t')",
        table,
        copy_columns(profile)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ACC_PROFILE, MIC_PROFILE};

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("normal_acc_data").is_ok());
        assert!(validate_identifier("_t1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1table").is_err());
        assert!(validate_identifier("acc; DROP TABLE x").is_err());
        assert!(validate_identifier("acc-data").is_err());
        assert!(validate_identifier(&"a".repeat(63)).is_ok());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_create_table_column_types() {
        let acc = create_table("normal_acc_data", &ACC_PROFILE);
        assert!(acc.starts_with("CREATE TABLE IF NOT EXISTS normal_acc_data"));
        assert!(acc.contains("x DOUBLE PRECISION NOT NULL"));
        assert!(acc.contains("z DOUBLE PRECISION NOT NULL"));
        assert!(acc.contains("time TIMESTAMPTZ NOT NULL"));

        let mic = create_table("normal_mic_data", &MIC_PROFILE);
        assert!(mic.contains("mic_value INTEGER NOT NULL"));
        assert!(!mic.contains("DOUBLE PRECISION"));
    }

    #[test]
    fn test_maintenance_statements() {
        assert!(create_hypertable("t").contains("INTERVAL '30 days'"));
        assert!(enable_compression("t").contains("compress_segmentby = 'machine_id'"));
        assert_eq!(
            set_autovacuum("t", false),
            "ALTER TABLE t SET (autovacuum_enabled = false, toast.autovacuum_enabled = false)"
        );
        assert_eq!(
            create_time_index("t"),
            "CREATE INDEX IF NOT EXISTS idx_t_machine_time ON t (machine_id, time DESC)"
        );
    }

    #[test]
    fn test_compress_chunks_binds_watermark() {
        assert!(compress_chunks("t", true).contains("older_than => $1::timestamptz"));
        assert!(!compress_chunks("t", false).contains("$1"));
    }

    #[test]
    fn test_copy_statement() {
        assert_eq!(
            copy_statement("normal_mic_data", &MIC_PROFILE),
            "COPY normal_mic_data (time, machine_id, mic_value, filename) FROM STDIN WITH (FORMAT csv, DELIMITER E'\\t')"
        );
    }
}
