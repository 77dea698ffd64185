//! Standard analysis verticals
//!
//! Each vertical is an independent [`Pipeline`] reading the seeded document
//! keys and writing only under its own namespace.

pub mod compliance;
pub mod external_signal;
pub mod logic;
pub mod numeric;

pub use numeric::TableVerificationTask;

use vouch_engine::{Pipeline, PipelineError};

/// The four standard verticals, in launch order
///
/// # Errors
/// Wiring errors (not expected for the built-in layouts).
pub fn standard() -> Result<Vec<Pipeline>, PipelineError> {
    Ok(vec![
        numeric::pipeline()?,
        logic::pipeline()?,
        compliance::pipeline()?,
        external_signal::pipeline()?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_verticals_are_wired_into_their_own_namespaces() {
        let verticals = standard().unwrap();
        let names: Vec<&str> = verticals.iter().map(Pipeline::name).collect();
        assert_eq!(names, ["numeric", "logic", "compliance", "external_signal"]);
        for vertical in &verticals {
            assert_eq!(vertical.terminal_key().pipeline(), vertical.name());
        }
    }
}
