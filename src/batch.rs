//! Bounded-concurrency batch extraction.
//!
//! Each path is extracted on a blocking thread, with at most `concurrency`
//! extractions in flight. Results come back in input order, so index `i`
//! of the report always belongs to input path `i`. One file's failure
//! never affects its siblings.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ExtractionErrorKind;
use crate::models::ExtractionOutcome;
use crate::router::ExtractionRouter;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileResult {
    pub path: PathBuf,
    pub outcome: ExtractionOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<FileResult>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_success()).count()
    }

    /// Paths that failed, with the failure kind.
    pub fn failures(&self) -> Vec<(&Path, ExtractionErrorKind)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.error().map(|kind| (r.path.as_path(), kind)))
            .collect()
    }

    pub fn total_units(&self) -> usize {
        self.results.iter().map(|r| r.outcome.units().len()).sum()
    }
}

/// Extracts every path through `router`, `concurrency` at a time.
pub async fn extract_batch(
    router: Arc<ExtractionRouter>,
    paths: Vec<PathBuf>,
    concurrency: usize,
) -> BatchReport {
    let total = paths.len();
    let results: Vec<FileResult> = stream::iter(paths)
        .map(|path| {
            let router = Arc::clone(&router);
            async move {
                let task_path = path.clone();
                let outcome =
                    match tokio::task::spawn_blocking(move || router.extract(&task_path)).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "extraction task failed");
                            ExtractionOutcome::Failure(ExtractionErrorKind::UnknownError)
                        }
                    };
                FileResult { path, outcome }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let report = BatchReport { results };
    info!(
        total,
        succeeded = report.succeeded(),
        units = report.total_units(),
        "batch extraction finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractError;
    use crate::models::ContentUnit;
    use crate::router::RouterBuilder;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let tmp = TempDir::new().unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (current, max) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let slow = move |_path: &Path| -> Result<Vec<ContentUnit>, ExtractError> {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![ContentUnit::new("ok")])
        };

        let mut builder = RouterBuilder::new();
        builder
            .add_extractor("slow", slow, None)
            .unwrap()
            .add_file_mapping("slow", ["txt"])
            .unwrap();
        let router = Arc::new(builder.build());

        let paths: Vec<PathBuf> = (0..12)
            .map(|i| {
                let path = tmp.path().join(format!("{}.txt", i));
                fs::write(&path, "x").unwrap();
                path
            })
            .collect();

        let report = extract_batch(router, paths.clone(), 4).await;
        assert_eq!(report.succeeded(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        let order: Vec<&PathBuf> = report.results.iter().map(|r| &r.path).collect();
        assert_eq!(order, paths.iter().collect::<Vec<_>>());
    }
}
