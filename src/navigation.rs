//! Cursor over a step plan: next/previous, completion, and navigation visibility.
//!
//! Pure in-memory state. Persisting the cursor is the caller's job (see `sync`).
//! Every step change bumps `generation`; async block work started under an older
//! generation must be dropped when it returns.

use serde::Serialize;

use crate::domain::Navigation;
use crate::plan::{StepComponent, StepPlan, StepPlanEntry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NavEvent {
  Moved { from: usize, to: usize },
  Stayed,
  /// `advance()` on the last step: nothing to move to, the run is finished.
  Completed,
}

#[derive(Clone, Debug)]
pub struct NavigationController {
  plan: StepPlan,
  current: usize,
  completed: bool,
  nav_override: Option<bool>,
  generation: u64,
}

impl NavigationController {
  pub fn new(plan: StepPlan, initial_step: usize, completed: bool) -> Self {
    let current = initial_step.min(plan.last_index());
    Self { plan, current, completed, nav_override: None, generation: 0 }
  }

  pub fn plan(&self) -> &StepPlan { &self.plan }

  pub fn current_step(&self) -> usize { self.current }

  pub fn current_entry(&self) -> &StepPlanEntry {
    // current is clamped to the plan in `new` and `enter`
    &self.plan.entries()[self.current]
  }

  pub fn is_completed(&self) -> bool { self.completed }

  pub fn generation(&self) -> u64 { self.generation }

  /// True if work started under `generation` still belongs to the active step.
  pub fn is_current(&self, generation: u64) -> bool { self.generation == generation }

  pub fn advance(&mut self) -> NavEvent {
    if self.current < self.plan.last_index() {
      let from = self.current;
      self.enter(from + 1);
      NavEvent::Moved { from, to: self.current }
    } else {
      self.completed = true;
      NavEvent::Completed
    }
  }

  pub fn retreat(&mut self) -> NavEvent {
    if self.current == 0 {
      return NavEvent::Stayed;
    }
    let from = self.current;
    self.enter(from - 1);
    NavEvent::Moved { from, to: self.current }
  }

  /// Set by the active block; cleared whenever the cursor moves.
  pub fn set_nav_override(&mut self, show: Option<bool>) {
    self.nav_override = show;
  }

  pub fn nav_override(&self) -> Option<bool> { self.nav_override }

  /// Whether the generic next/previous controls should render for the current step.
  pub fn show_navigation(&self) -> bool {
    if let Some(show) = self.nav_override {
      return show;
    }
    let entry = self.current_entry();
    match entry.component {
      StepComponent::Title => false,
      _ => entry.navigation() == Navigation::Parent,
    }
  }

  fn enter(&mut self, step: usize) {
    self.current = step;
    self.nav_override = None;
    self.generation += 1;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{BlockKind::*, ContentBlock};
  use crate::plan::build_plan;

  fn controller(at: usize) -> NavigationController {
    let content: Vec<ContentBlock> = [Text, AiQuestion, FeelingsDetective, Breathe]
      .into_iter()
      .map(ContentBlock::new)
      .collect();
    NavigationController::new(build_plan(&content), at, false)
  }

  #[test]
  fn retreat_at_start_is_noop() {
    let mut nav = controller(0);
    assert_eq!(nav.retreat(), NavEvent::Stayed);
    assert_eq!(nav.current_step(), 0);
    assert_eq!(nav.generation(), 0);
  }

  #[test]
  fn advance_on_last_step_completes_instead_of_moving() {
    let mut nav = controller(0);
    let last = nav.plan().last_index();
    while nav.current_step() < last {
      assert!(matches!(nav.advance(), NavEvent::Moved { .. }));
    }
    assert!(!nav.is_completed());
    assert_eq!(nav.advance(), NavEvent::Completed);
    assert!(nav.is_completed());
    assert_eq!(nav.current_step(), last);
  }

  #[test]
  fn two_quick_advances_move_two_steps() {
    let mut nav = controller(2);
    nav.advance();
    nav.advance();
    assert_eq!(nav.current_step(), 4);
  }

  #[test]
  fn initial_step_is_clamped() {
    let nav = controller(500);
    assert_eq!(nav.current_step(), nav.plan().last_index());
  }

  #[test]
  fn default_visibility_rule() {
    // 0 title, 1 text, 2-3 aiQuestion, 4-8 feelingsDetective, 9 breathe, 10 summary
    let cases = [(0, false), (1, true), (2, false), (3, false), (6, false), (9, true), (10, true)];
    for (step, shown) in cases {
      assert_eq!(controller(step).show_navigation(), shown, "step {step}");
    }
  }

  #[test]
  fn override_wins_until_cursor_moves() {
    let mut nav = controller(1);
    nav.set_nav_override(Some(false));
    assert!(!nav.show_navigation());
    nav.advance();
    assert_eq!(nav.nav_override(), None);
    nav.retreat();
    assert!(nav.show_navigation());

    let mut nav = controller(2);
    nav.set_nav_override(Some(true));
    assert!(nav.show_navigation());
  }

  #[test]
  fn generation_tracks_step_changes() {
    let mut nav = controller(1);
    let g = nav.generation();
    assert!(nav.is_current(g));
    nav.advance();
    assert!(!nav.is_current(g));
  }
}
