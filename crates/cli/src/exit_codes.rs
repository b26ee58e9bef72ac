//! CLI Exit Code Registry
//!
//! Single source of truth for `plotcheck` exit codes. Scripts rely on them.
//!
//! | Code | Meaning                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | Success (findings do not fail the run by default)        |
//! | 1    | Findings present and `--fail-on-findings` was given      |
//! | 2    | Usage error (bad arguments, no inputs configured)        |
//! | 3    | Invalid configuration (parse, validation, CRS)           |
//! | 4    | Unreadable or structurally broken input dataset          |
//! | 5    | Report could not be written                              |

use plotcheck_audit::AuditError;

/// Success.
pub const EXIT_SUCCESS: u8 = 0;

/// Anomalies or overlaps found, with `--fail-on-findings`.
pub const EXIT_FINDINGS: u8 = 1;

/// Usage error: bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Config file unreadable, unparseable or rejected by validation.
pub const EXIT_CONFIG: u8 = 3;

/// Input dataset missing, unreadable, or missing its identifier column.
pub const EXIT_INPUT: u8 = 4;

/// Output directory or report file could not be written.
pub const EXIT_OUTPUT: u8 = 5;

/// Map an engine error to its exit code.
pub fn audit_exit_code(err: &AuditError) -> u8 {
    match err {
        AuditError::ConfigParse(_) | AuditError::ConfigValidation(_) | AuditError::UnsupportedCrs(_) => EXIT_CONFIG,
        AuditError::MissingInput(_)
        | AuditError::MissingColumn { .. }
        | AuditError::Csv { .. }
        | AuditError::GeoJson(_) => EXIT_INPUT,
    }
}
