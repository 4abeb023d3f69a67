//! Output Stability
//!
//! Since the RunKey already includes the input's content hash, a changed output
//! hash under an unchanged key can only come from non-determinism or an
//! unintended code change. Either halts propagation of the output.
//!
//! The check is only meaningful against a prior SUCCESS record for the same
//! key; anything else is a no-op.

use crate::runner::error::StabilityDivergence;
use crate::runner::record::RunRecord;
use crate::runner::run_key::RunKey;

#[derive(Debug, Clone, Copy, Default)]
pub struct StabilityChecker;

impl StabilityChecker {
    pub fn new() -> Self {
        Self
    }

    pub fn check(
        &self,
        run_key: &RunKey,
        previous: Option<&RunRecord>,
        fresh_output_sha256: &str,
        fresh_top_sha256: Option<&str>,
    ) -> Result<(), StabilityDivergence> {
        let Some(prev) = previous else {
            return Ok(());
        };
        if &prev.run_key != run_key || !prev.is_success() {
            return Ok(());
        }

        compare("output", &prev.output.sha256, Some(fresh_output_sha256))?;

        if let Some(prev_top) = &prev.top_artifact {
            compare("top_artifact", &prev_top.sha256, fresh_top_sha256)?;
        }
        Ok(())
    }
}

/// Diverges only when a non-empty recorded hash exists for the artifact.
fn compare(artifact: &str, recorded: &str, fresh: Option<&str>) -> Result<(), StabilityDivergence> {
    if recorded.is_empty() {
        return Ok(());
    }
    match fresh {
        Some(fresh) if fresh == recorded => Ok(()),
        // The artifact was not declared this time; nothing to compare.
        None => Ok(()),
        Some(fresh) => Err(StabilityDivergence {
            artifact: artifact.to_string(),
            recorded_sha256: recorded.to_string(),
            fresh_sha256: fresh.to_string(),
        }),
    }
}
