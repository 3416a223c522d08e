//! Conversation sessions driven through the public manager API

use metatron_memory::config::ConversationConfig;
use metatron_memory::conversation::{Condition, ConversationFlow, ConversationManager, FlowStep, FlowType};
use metatron_memory::{ConversationState, Role};

fn three_step_flow() -> ConversationFlow {
    ConversationFlow {
        flow_id: "trip_planning".into(),
        flow_name: "Trip Planning".into(),
        flow_type: FlowType::MultiStepTask,
        description: "Plan a trip in three steps".into(),
        trigger_patterns: vec!["trip".into()],
        brain_regions: Vec::new(),
        steps: vec![
            FlowStep::Message {
                template: "Planning: {user_message}".into(),
            },
            FlowStep::Condition {
                condition: Condition::Always,
            },
            FlowStep::Message {
                template: "Your trip is planned.".into(),
            },
        ],
        required_context: Vec::new(),
        expected_duration: 60,
        fallback_actions: Vec::new(),
        metadata: Default::default(),
    }
}

#[tokio::test]
async fn test_flow_completes_after_one_call_per_step() {
    let manager = ConversationManager::new(ConversationConfig::default());
    manager.register_flow(three_step_flow()).await.unwrap();
    let ctx = manager.start_conversation("iris", "hi", None).await.unwrap();

    let messages = ["plan a trip to Lisbon", "sounds good", "thanks"];
    let mut last = None;
    for message in messages {
        let result = manager.process_message(&ctx.session_id, message, "user").await.unwrap();
        assert!(result.success);
        assert!(result.step_completed);
        assert_eq!(result.flow_id.as_deref(), Some("trip_planning"));
        last = Some(result);
    }

    let last = last.unwrap();
    assert!(last.flow_completed);
    assert_eq!(last.response.as_deref(), Some("Your trip is planned."));

    let session = manager.get_session(&ctx.session_id).await.unwrap();
    assert_eq!(session.current_state, ConversationState::Completed);
    assert!(session.current_flow.is_none());
    assert!(session.flow_duration().unwrap() >= 0.0);
    assert_eq!(session.completed_flows, vec!["trip_planning".to_string()]);
}

#[tokio::test]
async fn test_history_keeps_most_recent_messages() {
    let config = ConversationConfig {
        max_conversation_history: 4,
        ..ConversationConfig::default()
    };
    let manager = ConversationManager::new(config);
    // parietal region keeps both default flows below the threshold
    let ctx = manager.start_conversation("jo", "current task notes", None).await.unwrap();
    for i in 1..=5 {
        manager
            .process_message(&ctx.session_id, &format!("note {}", i), "user")
            .await
            .unwrap();
    }

    let session = manager.get_session(&ctx.session_id).await.unwrap();
    assert_eq!(session.conversation_history.len(), 4);
    let user_notes: Vec<&str> = session
        .conversation_history
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(user_notes, vec!["note 4", "note 5"]);
    for pair in session.conversation_history.iter().collect::<Vec<_>>().windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test]
async fn test_unknown_message_type_is_rejected() {
    let manager = ConversationManager::new(ConversationConfig::default());
    let ctx = manager.start_conversation("kai", "hello", None).await.unwrap();
    assert!(manager.process_message(&ctx.session_id, "hello", "robot").await.is_err());
    assert!(manager.process_message("no-such-session", "hello", "user").await.is_err());
}
