//! Resolution pipelines
//!
//! A pipeline is the ordered list of [`Stage`]s a registration runs to
//! produce a value. It is built once per registration, on first resolution,
//! and cached in the registration.
//!
//! Two strategies are available:
//!
//! - [`PipelineStrategy::Interpreted`] walks the stage list on every call
//!   and redoes member selection each time.
//! - [`PipelineStrategy::Specialized`] folds the stages into a single
//!   closure that reuses its member selection until the registrations
//!   visible from the resolving scope, or the metadata, change.
//!
//! Both select the same members for the same registrations. Resolutions
//! carrying resolver overrides always run interpreted, since overrides
//! change selection.

mod frame;
mod stages;

pub use frame::Resolver;
pub(crate) use frame::{CallGraph, Frame};
pub use stages::Stage;

use crate::error::Fault;
use crate::registration::RegistrationManager;
use stages::Chain;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

/// Compiled form of a stage chain
pub(crate) type Compiled = Arc<dyn Fn(&mut Frame<'_>) -> Result<(), Fault> + Send + Sync>;

#[inline]
pub(crate) fn compiled<F>(f: F) -> Compiled
where
    F: for<'f, 'g> Fn(&'f mut Frame<'g>) -> Result<(), Fault> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How pipelines are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineStrategy {
    /// Walk the stage list on every resolution
    Interpreted,
    /// Fold the stages into a closure that caches member selection
    #[default]
    Specialized,
}

/// A cached resolution pipeline
#[derive(Clone)]
pub(crate) enum Pipeline {
    Interpreted(Arc<[Stage]>),
    Specialized { compiled: Compiled, stages: Arc<[Stage]> },
}

impl Pipeline {
    pub(crate) fn interpreted(stages: Vec<Stage>) -> Self {
        Pipeline::Interpreted(stages.into())
    }

    pub(crate) fn specialized(stages: Vec<Stage>) -> Self {
        Pipeline::Specialized {
            compiled: stages::specialize(&stages),
            stages: stages.into(),
        }
    }

    /// Build the pipeline for `registration`
    pub(crate) fn build(strategy: PipelineStrategy, registration: &RegistrationManager) -> Self {
        let stages = Stage::for_category(registration.category());

        #[cfg(feature = "logging")]
        debug!(
            target: "injector_runtime",
            contract = %registration.contract(),
            category = ?registration.category(),
            strategy = ?strategy,
            stages = stages.len(),
            "Building resolution pipeline"
        );

        match strategy {
            PipelineStrategy::Interpreted => Pipeline::interpreted(stages),
            PipelineStrategy::Specialized => Pipeline::specialized(stages),
        }
    }

    pub(crate) fn strategy(&self) -> PipelineStrategy {
        match self {
            Pipeline::Interpreted(_) => PipelineStrategy::Interpreted,
            Pipeline::Specialized { .. } => PipelineStrategy::Specialized,
        }
    }

    #[cfg(test)]
    /// Number of stages, if the pipeline is still a stage list
    pub(crate) fn stage_count(&self) -> Option<usize> {
        match self {
            Pipeline::Interpreted(stages) => Some(stages.len()),
            Pipeline::Specialized { .. } => None,
        }
    }

    pub(crate) fn stages(&self) -> &[Stage] {
        match self {
            Pipeline::Interpreted(stages) | Pipeline::Specialized { stages, .. } => stages,
        }
    }

    /// Run the pipeline; on success the frame holds the value
    pub(crate) fn run(&self, frame: &mut Frame<'_>) -> Result<(), Fault> {
        match self {
            Pipeline::Specialized { compiled, .. } if !frame.graph.has_overrides() => compiled(frame),
            _ => Chain::new(self.stages()).run(frame),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("strategy", &self.strategy())
            .field("stages", &self.stages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::Category;

    #[test]
    fn test_stage_order_per_category() {
        assert_eq!(
            Stage::for_category(Category::Factory),
            vec![Stage::Lifetime, Stage::Instance]
        );
        assert_eq!(
            Stage::for_category(Category::TypeMapping),
            vec![
                Stage::Lifetime,
                Stage::Mapping,
                Stage::Construction,
                Stage::Fields,
                Stage::Properties,
                Stage::Methods,
            ]
        );
        assert_eq!(
            Stage::for_category(Category::ExplicitType).first(),
            Some(&Stage::Lifetime)
        );
    }

    #[test]
    fn test_specialized_keeps_stage_list() {
        let pipeline = Pipeline::specialized(vec![Stage::Lifetime, Stage::Instance]);
        assert_eq!(pipeline.strategy(), PipelineStrategy::Specialized);
        assert_eq!(pipeline.stage_count(), None);
        assert_eq!(pipeline.stages(), &[Stage::Lifetime, Stage::Instance]);
    }

    #[test]
    fn test_default_strategy_is_specialized() {
        assert_eq!(PipelineStrategy::default(), PipelineStrategy::Specialized);
    }
}
