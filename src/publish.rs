//! Publish precondition.
//!
//! The core always returns the merged plan, blocked or not. Anything that
//! pushes a plan or its tasks outward calls [`ensure_publishable`] first.

use tracing::warn;

use crate::error::PublishError;
use crate::qa::QaResult;

/// Refuses a plan the QA gate blocked.
///
/// # Errors
///
/// Returns `QaBlocked` with the gate's fixes when `qa.blocked` is set.
///
/// # Examples
///
/// ```
/// use buildplan::{ensure_publishable, QaResult, QaReview};
///
/// let qa = QaResult::from_review(QaReview { score: 72, ..QaReview::default() }, 85);
/// assert!(ensure_publishable(&qa).is_err());
/// ```
pub fn ensure_publishable(qa: &QaResult) -> Result<(), PublishError> {
    if !qa.blocked {
        return Ok(());
    }
    warn!(score = qa.score, threshold = qa.threshold, "publish refused");
    Err(PublishError::QaBlocked {
        score: qa.score,
        threshold: qa.threshold,
        fixes: qa.fixes.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qa::QaReview;

    #[test]
    fn passing_plan_publishes() {
        let qa = QaResult::from_review(QaReview { score: 90, ..QaReview::default() }, 85);
        assert!(ensure_publishable(&qa).is_ok());
    }

    #[test]
    fn blocked_plan_carries_fixes() {
        let qa = QaResult::from_review(
            QaReview {
                score: 72,
                findings: vec!["no hold point".to_string()],
                fixes: vec!["Add hold point for weld NDT".to_string()],
            },
            85,
        );
        let err = ensure_publishable(&qa).unwrap_err();
        assert_eq!(
            err,
            PublishError::QaBlocked {
                score: 72,
                threshold: 85,
                fixes: vec!["Add hold point for weld NDT".to_string()],
            }
        );
        assert!(err.to_string().contains("score 72"));
    }
}
