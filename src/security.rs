//! Security module: lexical query guards and identifier validation.

mod datasets;
mod guard;
mod identifiers;
mod lexer;
mod validation;

pub use datasets::{
    referenced_datasets, validate_dataset_references, DatasetAllowList, ParseAllowListError,
};
pub use guard::{GuardRejection, GuardStage, QueryGuard};
pub use identifiers::{
    validate_dataset_id, validate_location, validate_project_id, validate_table_id,
    MAX_IDENTIFIER_LENGTH,
};
pub use lexer::{split_statements, tokenize, Position, SqlToken, TokenKind};
pub use validation::{
    check_read_only, is_read_only, GuardViolation, ValidationVerdict, FORBIDDEN_OPERATIONS,
};
