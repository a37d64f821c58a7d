pub mod columns;
pub mod fingerprint;
pub mod match_engine;
pub mod statement;
pub mod util;
pub mod validate;

pub use columns::{ColumnKind, ColumnMap};
pub use fingerprint::{fingerprint, fingerprint_parts};
pub use match_engine::{AutoMatchEngine, MatchCandidate, MatchableTransaction};
pub use statement::{parse_statement, ParseDiagnostics, ParseError, ParsedStatement, StatementRow};
pub use validate::{check_fingerprints, validate_batch, BatchValidation, ValidationIssue};
