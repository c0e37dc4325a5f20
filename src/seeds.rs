//! Built-in topics so the service is usable without a content backend or config.

use crate::domain::{BlockKind, ContentBlock, Topic, TopicVersion};

pub fn seed_topics() -> Vec<Topic> {
  vec![
    Topic {
      id: "seed-listening".into(),
      slug: "listening-with-empathy".into(),
      title: "Listening with empathy".into(),
      image: Some("/images/topics/listening.png".into()),
      category_color: Some("#7BA7D9".into()),
      current_version: TopicVersion {
        id: "seed-listening@1".into(),
        content: vec![
          ContentBlock::new(BlockKind::Heading).with_field("text", "Why listening matters"),
          ContentBlock::new(BlockKind::Text)
            .with_field("body", "Being heard calms the nervous system. Today we practise reflecting before responding."),
          ContentBlock::new(BlockKind::Breathe).with_field("cycles", 3).with_field("skippable", true),
          ContentBlock::new(BlockKind::AiQuestion)
            .with_field("question", "Think of a recent conversation where you felt unheard. What happened?"),
          ContentBlock::new(BlockKind::FeelingsDetective)
            .with_field("prompt", "Describe a situation that is still on your mind."),
          ContentBlock::new(BlockKind::Task)
            .with_field("text", "This week, reflect back one sentence before you answer someone."),
        ],
      },
    },
    Topic {
      id: "seed-needs".into(),
      slug: "needs-behind-feelings".into(),
      title: "Needs behind feelings".into(),
      image: None,
      category_color: Some("#E3A857".into()),
      current_version: TopicVersion {
        id: "seed-needs@1".into(),
        content: vec![
          ContentBlock::new(BlockKind::Text).with_field("body", "Every feeling points to a need that is met or unmet."),
          ContentBlock::new(BlockKind::List)
            .with_field("items", serde_json::json!(["Connection", "Autonomy", "Rest", "Meaning"])),
          ContentBlock::new(BlockKind::Sortable).with_field(
            "buckets",
            serde_json::json!({ "left": "Feeling", "right": "Need", "items": ["sad", "belonging", "tense", "safety"] }),
          ),
          ContentBlock::new(BlockKind::NeedsDetective).with_field("prompt", "Which need was alive in you?"),
          ContentBlock::new(BlockKind::MultipleChoice).with_field(
            "question",
            "Which sentence is an observation?",
          ),
        ],
      },
    },
  ]
}
