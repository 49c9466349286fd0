use tracing::{error, info, warn};

pub mod dynamic_analyzer;
pub mod report;

pub use dynamic_analyzer::DynamicAnalyzer;
pub use report::build_result;

use shared::{Package, RunPhase};

use crate::models::{AnalysisError, IncompleteAnalysis, PhaseResults, Status};
use crate::sandbox::Sandbox;

/// Runs every phase of a package through one sandbox.
///
/// Phases run in the ecosystem's order. The first phase that does not
/// complete stops the run; an infrastructure error stops it too and is
/// returned together with the results gathered so far.
pub struct AnalysisEngine<S: Sandbox> {
    sandbox: S,
    analyzer: DynamicAnalyzer,
}

impl<S: Sandbox> AnalysisEngine<S> {
    pub fn new(sandbox: S, analyzer: DynamicAnalyzer) -> Self {
        Self { sandbox, analyzer }
    }

    pub async fn run(&mut self, package: &Package) -> Result<PhaseResults, IncompleteAnalysis> {
        info!(package = %package, "Starting dynamic analysis");
        let mut results = PhaseResults::default();

        if let Err(e) = self.sandbox.init().await {
            error!(package = %package, "Failed to prepare sandbox: {}", e);
            self.clean().await;
            return Err(IncompleteAnalysis {
                phase: None,
                partial: results,
                source: e.into(),
            });
        }

        let outcome = self.run_phases(package, &mut results).await;
        self.clean().await;

        match outcome {
            Ok(()) => {
                info!(
                    package = %package,
                    last_phase = ?results.last_phase,
                    status = ?results.status,
                    "Dynamic analysis finished"
                );
                Ok(results)
            }
            Err((phase, source)) => {
                error!(package = %package, %phase, "Analysis aborted: {}", source);
                results.last_phase = Some(phase);
                results.status = Some(Status::ErrorOther);
                Err(IncompleteAnalysis {
                    phase: Some(phase),
                    partial: results,
                    source,
                })
            }
        }
    }

    async fn run_phases(
        &mut self,
        package: &Package,
        results: &mut PhaseResults,
    ) -> Result<(), (RunPhase, AnalysisError)> {
        for &phase in package.run_phases() {
            let argv = package.command(phase);
            info!(package = %package, %phase, "Running phase");
            results.last_phase = Some(phase);

            let result = self
                .analyzer
                .run_phase(&mut self.sandbox, phase, &argv)
                .await
                .map_err(|e| (phase, e))?;

            let status = result.status;
            results.status = Some(status);
            results.results.insert(phase, result);

            if !status.is_completed() {
                warn!(package = %package, %phase, %status, "Phase did not complete; skipping remaining phases");
                break;
            }
        }
        Ok(())
    }

    async fn clean(&mut self) {
        if let Err(e) = self.sandbox.clean().await {
            warn!("Failed to clean up sandbox: {}", e);
        }
    }
}
