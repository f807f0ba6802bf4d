//! Worker matching for new jobs

use taskmart_db::Ledger;
use taskmart_types::{normalize_skill, Worker};

use crate::error::Result;

/// Pick a worker for the given ranked skills.
///
/// Skills are tried in order; the first with an available worker wins. With
/// no skill match the highest-rated available worker is taken. `None` means
/// nobody is available and the job is created unassigned.
pub async fn select_worker(ledger: &dyn Ledger, skills: &[String]) -> Result<Option<Worker>> {
    for skill in skills {
        let skill = normalize_skill(skill);
        if skill.is_empty() {
            continue;
        }
        if let Some(worker) = ledger.find_available_worker(&skill).await? {
            return Ok(Some(worker));
        }
    }
    Ok(ledger.top_rated_available_worker().await?)
}
