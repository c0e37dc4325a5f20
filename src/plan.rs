//! Step plan: flattens a topic outline into the linear sequence of navigable steps.
//!
//! Layout is always `title`, then every block expanded to its step count, then `summary`.
//! The plan is a pure function of the content array and never changes after it is built.

use serde::{Serialize, Serializer};

use crate::domain::{BlockKind, ContentBlock, Navigation};

/// Logical kind of a step: synthetic title/summary, or the owning block's kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepComponent {
  Title,
  Block(BlockKind),
  Summary,
}

impl StepComponent {
  pub fn as_str(self) -> &'static str {
    match self {
      StepComponent::Title => "title",
      StepComponent::Summary => "summary",
      StepComponent::Block(k) => k.as_str(),
    }
  }
}

impl Serialize for StepComponent {
  fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(self.as_str())
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPlanEntry {
  pub component: StepComponent,
  pub internal_step: usize,
  /// `None` for the synthetic title/summary steps (`-1` on the wire).
  #[serde(serialize_with = "index_or_minus_one")]
  pub block_index: Option<usize>,
}

impl StepPlanEntry {
  pub fn navigation(&self) -> Navigation {
    match self.component {
      StepComponent::Block(k) => k.navigation(),
      StepComponent::Title | StepComponent::Summary => Navigation::Parent,
    }
  }
}

fn index_or_minus_one<S: Serializer>(v: &Option<usize>, s: S) -> Result<S::Ok, S::Error> {
  match v {
    Some(i) => s.serialize_i64(*i as i64),
    None => s.serialize_i64(-1),
  }
}

pub fn step_count(block: &ContentBlock) -> usize {
  block.kind.step_count()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StepPlan {
  entries: Vec<StepPlanEntry>,
}

pub fn build_plan(content: &[ContentBlock]) -> StepPlan {
  let body: usize = content.iter().map(step_count).sum();
  let mut entries = Vec::with_capacity(body + 2);
  entries.push(StepPlanEntry { component: StepComponent::Title, internal_step: 0, block_index: None });
  for (i, block) in content.iter().enumerate() {
    for internal_step in 0..step_count(block) {
      entries.push(StepPlanEntry {
        component: StepComponent::Block(block.kind),
        internal_step,
        block_index: Some(i),
      });
    }
  }
  entries.push(StepPlanEntry { component: StepComponent::Summary, internal_step: 0, block_index: None });
  StepPlan { entries }
}

impl StepPlan {
  pub fn total_steps(&self) -> usize { self.entries.len() }

  /// Index of the summary step; a plan always has at least title and summary.
  pub fn last_index(&self) -> usize { self.entries.len() - 1 }

  pub fn contains(&self, step: usize) -> bool { step < self.entries.len() }

  pub fn entries(&self) -> &[StepPlanEntry] { &self.entries }
}
