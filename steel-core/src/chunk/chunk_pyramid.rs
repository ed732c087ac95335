//! Dependency pyramids describing which neighbours each pipeline stage needs and how far out.
//!
//! Every stage declares direct requirements ("status S within radius r"). The accumulated
//! dependencies of a stage fold in everything its parent needs, so a generation task can
//! work out, for every stage it passes through, how many neighbours must reach it first.
use std::sync::{Arc, LazyLock};

use crate::chunk::{
    chunk_access::{ChunkAccess, ChunkStatus},
    chunk_future::ChunkFuture,
    chunk_generation_task::StaticCache2D,
    chunk_holder::ChunkHolder,
    chunk_status_tasks::ChunkStatusTasks,
    world_gen_context::WorldGenContext,
};

/// The work a step performs on the parent-stage chunk.
pub type StatusTask = fn(
    &Arc<WorldGenContext>,
    &ChunkStep,
    &Arc<StaticCache2D<Arc<ChunkHolder>>>,
    Arc<ChunkAccess>,
) -> ChunkFuture<Arc<ChunkAccess>>;

/// The stage each distance from a chunk has to reach.
#[derive(Debug, Clone)]
pub struct ChunkDependencies {
    dependency_by_radius: Box<[ChunkStatus]>,
    radius_by_dependency: Box<[usize]>,
}

impl ChunkDependencies {
    /// Builds the lookup tables from a list of stages indexed by distance.
    #[must_use]
    pub fn new(dependency_by_radius: Vec<ChunkStatus>) -> Self {
        let size = dependency_by_radius
            .first()
            .map_or(0, |status| status.index() + 1);
        let mut radius_by_dependency = vec![0; size];

        for (radius, status) in dependency_by_radius.iter().enumerate() {
            for slot in radius_by_dependency.iter_mut().take(status.index() + 1) {
                *slot = radius;
            }
        }

        Self {
            dependency_by_radius: dependency_by_radius.into_boxed_slice(),
            radius_by_dependency: radius_by_dependency.into_boxed_slice(),
        }
    }

    /// The furthest distance at which `status` is still required.
    #[must_use]
    pub fn get_radius_of(&self, status: ChunkStatus) -> usize {
        self.radius_by_dependency
            .get(status.index())
            .copied()
            .unwrap_or(0)
    }

    /// The largest distance with a requirement.
    #[must_use]
    pub fn get_radius(&self) -> usize {
        self.dependency_by_radius.len().saturating_sub(1)
    }

    /// The number of distances with a requirement.
    #[must_use]
    pub fn size(&self) -> usize {
        self.dependency_by_radius.len()
    }

    /// The stage required at `distance`, if any.
    #[must_use]
    pub fn get(&self, distance: usize) -> Option<ChunkStatus> {
        self.dependency_by_radius.get(distance).copied()
    }
}

/// One stage of a pyramid.
pub struct ChunkStep {
    /// The stage this step produces.
    pub target_status: ChunkStatus,
    /// What this stage needs from its neighbours directly.
    pub direct_dependencies: ChunkDependencies,
    /// What this stage needs including everything its parents need.
    pub accumulated_dependencies: ChunkDependencies,
    /// How far outside its own chunk this step may write blocks.
    pub block_state_write_radius: i32,
    /// The work performed by this step.
    pub task: StatusTask,
}

impl ChunkStep {
    /// The furthest distance at which `status` must be reached before this step can run.
    #[must_use]
    pub fn get_accumulated_radius_of(&self, status: ChunkStatus) -> usize {
        if status == self.target_status {
            0
        } else {
            self.accumulated_dependencies.get_radius_of(status)
        }
    }

    /// Runs the step on the parent-stage chunk, recording the new stage on chunks that were not already past it.
    #[must_use]
    pub fn apply(
        &self,
        context: &Arc<WorldGenContext>,
        cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        if chunk.persisted_status() < self.target_status {
            let target = self.target_status;
            (self.task)(context, self, cache, chunk).map(move |result| {
                if let Ok(chunk) = result
                    && let ChunkAccess::Proto(proto) = &**chunk
                {
                    proto.set_persisted_status(target);
                }
                result.clone()
            })
        } else {
            (self.task)(context, self, cache, chunk)
        }
    }
}

struct ChunkStepBuilder {
    status: ChunkStatus,
    parent: Option<Arc<ChunkStep>>,
    direct_dependencies_by_radius: Vec<ChunkStatus>,
    block_state_write_radius: i32,
    task: StatusTask,
}

impl ChunkStepBuilder {
    fn new(status: ChunkStatus, parent: Option<Arc<ChunkStep>>) -> Self {
        Self {
            status,
            parent,
            direct_dependencies_by_radius: vec![status.parent()],
            block_state_write_radius: -1,
            task: ChunkStatusTasks::pass_through,
        }
    }

    fn add_requirement(mut self, status: ChunkStatus, radius: usize) -> Self {
        assert!(
            status < self.status,
            "Status {status} can not be required by {}",
            self.status
        );
        let length = self.direct_dependencies_by_radius.len();
        for existing in self
            .direct_dependencies_by_radius
            .iter_mut()
            .take(radius + 1)
        {
            *existing = (*existing).max(status);
        }
        if radius >= length {
            self.direct_dependencies_by_radius.resize(radius + 1, status);
        }
        self
    }

    const fn block_state_write_radius(mut self, radius: i32) -> Self {
        self.block_state_write_radius = radius;
        self
    }

    const fn set_task(mut self, task: StatusTask) -> Self {
        self.task = task;
        self
    }

    fn build(self) -> ChunkStep {
        let direct = self.direct_dependencies_by_radius;
        let accumulated = match &self.parent {
            None => direct.clone(),
            Some(parent) => {
                let shift = Self::radius_of(&direct, parent.target_status);
                let parent_accumulated = &parent.accumulated_dependencies;
                let length = (shift + parent_accumulated.size()).max(direct.len());
                (0..length)
                    .map(|distance| {
                        let own = direct.get(distance).copied();
                        let inherited = distance
                            .checked_sub(shift)
                            .and_then(|offset| parent_accumulated.get(offset));
                        match (own, inherited) {
                            (Some(a), Some(b)) => a.max(b),
                            (Some(a), None) => a,
                            (None, Some(b)) => b,
                            (None, None) => ChunkStatus::Empty,
                        }
                    })
                    .collect()
            }
        };

        ChunkStep {
            target_status: self.status,
            direct_dependencies: ChunkDependencies::new(direct),
            accumulated_dependencies: ChunkDependencies::new(accumulated),
            block_state_write_radius: self.block_state_write_radius,
            task: self.task,
        }
    }

    fn radius_of(direct: &[ChunkStatus], status: ChunkStatus) -> usize {
        direct
            .iter()
            .rposition(|dependency| *dependency >= status)
            .unwrap_or(0)
    }
}

/// A full pipeline of steps, one per stage.
pub struct ChunkPyramid {
    steps: Box<[Arc<ChunkStep>]>,
}

impl ChunkPyramid {
    /// The step producing `status`.
    #[must_use]
    pub fn get_step_to(&self, status: ChunkStatus) -> &Arc<ChunkStep> {
        &self.steps[status.index()]
    }
}

struct ChunkPyramidBuilder {
    steps: Vec<Arc<ChunkStep>>,
}

impl ChunkPyramidBuilder {
    const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    fn step(
        mut self,
        status: ChunkStatus,
        configure: impl FnOnce(ChunkStepBuilder) -> ChunkStepBuilder,
    ) -> Self {
        assert_eq!(
            status.index(),
            self.steps.len(),
            "Pyramid steps must be added in pipeline order"
        );
        let parent = self.steps.last().cloned();
        let step = configure(ChunkStepBuilder::new(status, parent)).build();
        self.steps.push(Arc::new(step));
        self
    }

    fn build(self) -> ChunkPyramid {
        assert_eq!(self.steps.len(), ChunkStatus::COUNT);
        ChunkPyramid {
            steps: self.steps.into_boxed_slice(),
        }
    }
}

/// The pyramid used when a chunk has to be generated.
pub static GENERATION_PYRAMID: LazyLock<ChunkPyramid> = LazyLock::new(|| {
    ChunkPyramidBuilder::new()
        .step(ChunkStatus::Empty, |s| s)
        .step(ChunkStatus::StructureStarts, |s| {
            s.set_task(ChunkStatusTasks::generate_structure_starts)
        })
        .step(ChunkStatus::StructureReferences, |s| {
            s.add_requirement(ChunkStatus::StructureStarts, 8)
                .set_task(ChunkStatusTasks::generate_structure_references)
        })
        .step(ChunkStatus::Biomes, |s| {
            s.add_requirement(ChunkStatus::StructureStarts, 8)
                .set_task(ChunkStatusTasks::generate_biomes)
        })
        .step(ChunkStatus::Noise, |s| {
            s.add_requirement(ChunkStatus::StructureStarts, 8)
                .add_requirement(ChunkStatus::Biomes, 1)
                .block_state_write_radius(0)
                .set_task(ChunkStatusTasks::generate_noise)
        })
        .step(ChunkStatus::Surface, |s| {
            s.add_requirement(ChunkStatus::StructureStarts, 8)
                .add_requirement(ChunkStatus::Biomes, 1)
                .block_state_write_radius(0)
                .set_task(ChunkStatusTasks::generate_surface)
        })
        .step(ChunkStatus::Carvers, |s| {
            s.add_requirement(ChunkStatus::StructureStarts, 8)
                .block_state_write_radius(0)
                .set_task(ChunkStatusTasks::generate_carvers)
        })
        .step(ChunkStatus::Features, |s| {
            s.add_requirement(ChunkStatus::StructureStarts, 8)
                .add_requirement(ChunkStatus::Carvers, 1)
                .block_state_write_radius(1)
                .set_task(ChunkStatusTasks::generate_features)
        })
        .step(ChunkStatus::InitializeLight, |s| {
            s.set_task(ChunkStatusTasks::initialize_light)
        })
        .step(ChunkStatus::Light, |s| {
            s.add_requirement(ChunkStatus::InitializeLight, 1)
                .set_task(ChunkStatusTasks::light)
        })
        .step(ChunkStatus::Spawn, |s| {
            s.add_requirement(ChunkStatus::Biomes, 1)
                .set_task(ChunkStatusTasks::generate_spawn)
        })
        .step(ChunkStatus::Full, |s| s.set_task(ChunkStatusTasks::full))
        .build()
});

/// The pyramid used when a chunk's data already went through a stage and only needs to be restored.
pub static LOADING_PYRAMID: LazyLock<ChunkPyramid> = LazyLock::new(|| {
    ChunkPyramidBuilder::new()
        .step(ChunkStatus::Empty, |s| s)
        .step(ChunkStatus::StructureStarts, |s| {
            s.set_task(ChunkStatusTasks::load_structure_starts)
        })
        .step(ChunkStatus::StructureReferences, |s| s)
        .step(ChunkStatus::Biomes, |s| s)
        .step(ChunkStatus::Noise, |s| s)
        .step(ChunkStatus::Surface, |s| s)
        .step(ChunkStatus::Carvers, |s| s)
        .step(ChunkStatus::Features, |s| s)
        .step(ChunkStatus::InitializeLight, |s| {
            s.set_task(ChunkStatusTasks::initialize_light)
        })
        .step(ChunkStatus::Light, |s| {
            s.add_requirement(ChunkStatus::InitializeLight, 1)
                .set_task(ChunkStatusTasks::light)
        })
        .step(ChunkStatus::Spawn, |s| s)
        .step(ChunkStatus::Full, |s| s.set_task(ChunkStatusTasks::full))
        .build()
});
