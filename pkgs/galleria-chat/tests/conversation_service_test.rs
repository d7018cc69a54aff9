// Tests for ConversationService and StoreRepository

use std::sync::Arc;

use galleria_chat::{
    conversation_id_for, has_unread, unread_count_for, ChatError, ConversationRepository,
    ConversationService, Resource, StaticDirectory, StoreRepository,
};
use galleria_store::{ConversationStore, NewConversation};
use tempfile::NamedTempFile;

const USERS: &str = r#"[
    {"id": "u1", "name": "Ada", "email": "ada@example.com", "role": "artist"},
    {"id": "u2", "name": "Gallery Admin", "email": "admin@example.com", "role": "admin"},
    {"id": "u3", "name": "Cleo", "email": "cleo@example.com", "role": "collector"}
]"#;

async fn create_test_service(
    path: &NamedTempFile,
) -> (Arc<ConversationStore>, Arc<ConversationService<StoreRepository>>) {
    let store = Arc::new(
        ConversationStore::new(path.path().to_path_buf())
            .await
            .expect("Failed to create conversation store"),
    );
    let directory = StaticDirectory::from_json(USERS).expect("Failed to parse users");
    let service = ConversationService::new(
        Arc::new(StoreRepository::new(store.clone())),
        Arc::new(directory),
    );
    (store, Arc::new(service))
}

#[test]
fn test_conversation_id_symmetry() {
    let ids: Vec<String> = (0..12)
        .map(|i| format!("user-{}", i * 7 % 12))
        .chain(["admin".to_string(), "Zed".to_string(), "a_b".to_string()])
        .collect();

    for a in &ids {
        for b in &ids {
            if a == b {
                continue;
            }
            assert_eq!(
                conversation_id_for(a, b).unwrap(),
                conversation_id_for(b, a).unwrap(),
                "ids differ for ({}, {})",
                a,
                b
            );
        }
    }
}

#[tokio::test]
async fn test_welcome_scenario() {
    let temp_file = NamedTempFile::new().unwrap();
    let (_store, service) = create_test_service(&temp_file).await;

    let started = service
        .start_conversation("u1", "u2", "Welcome!", Some("u2"), &[])
        .await
        .expect("Failed to start conversation");
    assert!(started.created);
    assert_eq!(started.conversation_id, "chat__u1__u2");

    let repository = service.repository();
    let conversation = repository
        .find_conversation_between("u2", "u1")
        .await
        .unwrap()
        .expect("Conversation not found");
    let mut participants = conversation.participants.clone();
    participants.sort();
    assert_eq!(participants, vec!["u1", "u2"]);
    assert_eq!(conversation.roles, vec!["artist", "admin"]);
    assert_eq!(conversation.initiated_by, "u1");

    let messages = repository.messages(&conversation.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender_id, "u2");
    assert_eq!(messages[0].text, "Welcome!");
    assert_eq!(messages[0].read_by, vec!["u2"]);
    assert_eq!(started.welcome.as_ref(), Some(&messages[0]));

    assert!(has_unread("u1", &conversation));
    assert!(!has_unread("u2", &conversation));
}

#[tokio::test]
async fn test_concurrent_start_creates_one_conversation() {
    let temp_file = NamedTempFile::new().unwrap();
    let (store, service) = create_test_service(&temp_file).await;

    let (first, second) = tokio::join!(
        service.start_conversation("u1", "u3", "Welcome!", None, &[]),
        service.start_conversation("u3", "u1", "Welcome!", None, &[]),
    );
    let first = first.expect("First start failed");
    let second = second.expect("Second start failed");

    assert_eq!(first.conversation_id, second.conversation_id);
    assert_eq!(
        [first.created, second.created].iter().filter(|c| **c).count(),
        1
    );
    assert_eq!(store.conversation_count().await.unwrap(), 1);

    let messages = service
        .repository()
        .messages(&first.conversation_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1, "welcome message posted twice");
}

#[tokio::test]
async fn test_start_resumes_existing_conversation() {
    let temp_file = NamedTempFile::new().unwrap();
    let (_store, service) = create_test_service(&temp_file).await;

    let started = service
        .start_conversation("u1", "u3", "Welcome!", None, &[])
        .await
        .unwrap();

    let resumed = service
        .start_conversation("u3", "u1", "Welcome!", None, &[])
        .await
        .unwrap();
    assert_eq!(resumed.conversation_id, started.conversation_id);
    assert!(!resumed.created);
    assert!(resumed.welcome.is_none());

    // The caller's list short-circuits the store lookup
    let known = service.repository().conversations_for("u1").await.unwrap();
    let from_known = service
        .start_conversation("u1", "u3", "Welcome!", None, &known)
        .await
        .unwrap();
    assert_eq!(from_known.conversation_id, started.conversation_id);
    assert!(!from_known.created);
}

#[tokio::test]
async fn test_hi_hello_scenario() {
    let temp_file = NamedTempFile::new().unwrap();
    let (store, service) = create_test_service(&temp_file).await;

    store
        .create_conversation_if_absent(galleria_store::NewConversation {
            id: Some(conversation_id_for("u1", "u3").unwrap()),
            participants: ["u1".to_string(), "u3".to_string()],
            roles: vec![],
            initiated_by: "u1".to_string(),
        })
        .await
        .unwrap();
    let id = conversation_id_for("u1", "u3").unwrap();

    service.send_message(&id, "u1", "hi").await.unwrap();
    service.send_message(&id, "u3", "hello").await.unwrap();

    let mut feed = service.repository().subscribe_messages(&id);
    let event = feed.next_event().await.unwrap().unwrap();
    let texts: Vec<&str> = event.value.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["hi", "hello"]);

    let conversation = service
        .repository()
        .find_conversation_between("u1", "u3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.last_message.as_deref(), Some("hello"));
    assert_eq!(conversation.last_message_read_by, Some(vec!["u3".to_string()]));
    assert!(has_unread("u1", &conversation));
}

#[tokio::test]
async fn test_mark_read_is_idempotent() {
    let temp_file = NamedTempFile::new().unwrap();
    let (_store, service) = create_test_service(&temp_file).await;

    let started = service
        .start_conversation("u1", "u2", "Welcome!", Some("u2"), &[])
        .await
        .unwrap();
    let welcome = started.welcome.unwrap();

    for _ in 0..5 {
        service
            .mark_read(&started.conversation_id, &welcome.id, "u1")
            .await
            .expect("Failed to mark read");
    }

    let messages = service
        .repository()
        .messages(&started.conversation_id)
        .await
        .unwrap();
    assert_eq!(
        messages[0].read_by.iter().filter(|id| *id == "u1").count(),
        1
    );
    assert_eq!(messages[0].read_by.len(), 2);
}

#[tokio::test]
async fn test_unread_count_drops_to_zero_after_reading() {
    let temp_file = NamedTempFile::new().unwrap();
    let (_store, service) = create_test_service(&temp_file).await;

    let from_admin = service
        .start_conversation("u1", "u2", "Welcome!", Some("u2"), &[])
        .await
        .unwrap();
    let from_collector = service
        .start_conversation("u3", "u1", "Love your work", None, &[])
        .await
        .unwrap();

    let repository = service.repository();
    let conversations = repository.conversations_for("u1").await.unwrap();
    assert_eq!(conversations.len(), 2);
    assert_eq!(unread_count_for("u1", &conversations), 2);

    for started in [&from_admin, &from_collector] {
        let welcome = started.welcome.as_ref().unwrap();
        service
            .mark_read(&started.conversation_id, &welcome.id, "u1")
            .await
            .unwrap();
    }

    let conversations = repository.conversations_for("u1").await.unwrap();
    assert_eq!(unread_count_for("u1", &conversations), 0);
}

#[tokio::test]
async fn test_messages_sorted_under_concurrent_senders() {
    let temp_file = NamedTempFile::new().unwrap();
    let (_store, service) = create_test_service(&temp_file).await;

    let started = service
        .start_conversation("u1", "u3", "Welcome!", None, &[])
        .await
        .unwrap();
    let id = started.conversation_id.clone();

    let mut feed = service.repository().subscribe_messages(&id);
    feed.next_event().await.unwrap().unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let service = service.clone();
        let id = id.clone();
        let sender = if i % 2 == 0 { "u1" } else { "u3" };
        handles.push(tokio::spawn(async move {
            service
                .send_message(&id, sender, &format!("message {}", i))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().expect("Send failed");
    }

    loop {
        let event = feed.next_event().await.unwrap().unwrap();
        let timestamps: Vec<_> = event.value.iter().map(|m| m.timestamp).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted, "emission not in ascending order");

        if event.value.len() == 21 {
            break;
        }
    }
}

#[tokio::test]
async fn test_generated_id_conversation_is_resumed_by_participants() {
    let temp_file = NamedTempFile::new().unwrap();
    let (store, service) = create_test_service(&temp_file).await;

    let admin_started = service
        .start_admin_conversation("u2", "u3", "Hello from the gallery")
        .await
        .expect("Failed to start admin conversation");
    assert!(admin_started.created);
    assert!(!admin_started.conversation_id.starts_with("chat__"));

    let resumed = service
        .start_conversation("u3", "u2", "Welcome!", None, &[])
        .await
        .unwrap();
    assert_eq!(resumed.conversation_id, admin_started.conversation_id);
    assert!(!resumed.created);
    assert_eq!(store.conversation_count().await.unwrap(), 1);

    let err = service
        .start_admin_conversation("u1", "u3", "Hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
}

#[tokio::test]
async fn test_list_shows_one_conversation_per_pair() {
    let temp_file = NamedTempFile::new().unwrap();
    let (store, service) = create_test_service(&temp_file).await;

    // Both id schemes for the same pair
    store
        .create_conversation_if_absent(galleria_store::NewConversation {
            id: None,
            participants: ["u2".to_string(), "u3".to_string()],
            roles: vec![],
            initiated_by: "u2".to_string(),
        })
        .await
        .unwrap();
    store
        .create_conversation_if_absent(galleria_store::NewConversation {
            id: Some(conversation_id_for("u2", "u3").unwrap()),
            participants: ["u3".to_string(), "u2".to_string()],
            roles: vec![],
            initiated_by: "u3".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(store.conversation_count().await.unwrap(), 2);

    let list = service.repository().conversations_for("u3").await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, "chat__u2__u3");
}

#[tokio::test]
async fn test_invalid_input_is_rejected_before_the_store() {
    let temp_file = NamedTempFile::new().unwrap();
    let (store, service) = create_test_service(&temp_file).await;

    let err = service
        .start_conversation("u1", "u1", "Welcome!", None, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    let err = service
        .start_conversation("u1", "ghost", "Welcome!", None, &[])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ChatError::NotFound {
            kind: Resource::Participant,
            id: "ghost".to_string()
        }
    );

    let err = service
        .start_conversation("u1", "u3", "Welcome!", Some("u2"), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert_eq!(store.conversation_count().await.unwrap(), 0);

    let started = service
        .start_conversation("u1", "u3", "Welcome!", None, &[])
        .await
        .unwrap();
    let err = service
        .send_message(&started.conversation_id, "u1", "   \n")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    let messages = service
        .repository()
        .messages(&started.conversation_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn test_send_to_missing_conversation() {
    let temp_file = NamedTempFile::new().unwrap();
    let (_store, service) = create_test_service(&temp_file).await;

    let err = service
        .send_message("chat__u1__u9", "u1", "anyone?")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ChatError::NotFound {
            kind: Resource::Conversation,
            ..
        }
    ));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_ids_containing_the_delimiter_are_rejected() {
    let temp_file = NamedTempFile::new().unwrap();
    let (store, service) = create_test_service(&temp_file).await;

    for (a, b) in [("a__b", "c"), ("a", "b__c")] {
        let err = service
            .start_conversation(a, b, "Welcome!", None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)), "accepted ({}, {})", a, b);
    }
    assert_eq!(store.conversation_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_canonical_id_held_by_another_pair_is_not_reused() {
    let temp_file = NamedTempFile::new().unwrap();
    let (store, service) = create_test_service(&temp_file).await;

    // Written directly, bypassing the id rules
    store
        .create_conversation_if_absent(NewConversation {
            id: Some(conversation_id_for("u1", "u3").unwrap()),
            participants: ["u1".to_string(), "u2".to_string()],
            roles: vec![],
            initiated_by: "u1".to_string(),
        })
        .await
        .unwrap();
    let repository = service.repository();

    assert!(repository
        .find_conversation_between("u1", "u3")
        .await
        .unwrap()
        .is_none());

    let err = repository
        .create_conversation_if_absent("u1", "u3", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvalidData(_)));

    let err = service
        .start_conversation("u3", "u1", "Welcome!", None, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvalidData(_)));

    let found = repository
        .find_conversation_between("u2", "u1")
        .await
        .unwrap()
        .expect("conversation for u1 and u2");
    assert_eq!(found.participant_pair(), ("u1".to_string(), "u2".to_string()));
    assert_eq!(store.conversation_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_outsiders_cannot_send_or_mark_read() {
    let temp_file = NamedTempFile::new().unwrap();
    let (_store, service) = create_test_service(&temp_file).await;

    let started = service
        .start_conversation("u1", "u3", "Welcome!", None, &[])
        .await
        .unwrap();
    let welcome = started.welcome.unwrap();

    let err = service
        .send_message(&started.conversation_id, "u2", "intruder")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    let err = service
        .mark_read(&started.conversation_id, &welcome.id, "u2")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    let messages = service
        .repository()
        .messages(&started.conversation_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].read_by, vec!["u1".to_string()]);

    let conversations = service.repository().conversations_for("u2").await.unwrap();
    assert!(conversations.is_empty());
}

#[tokio::test]
async fn test_messages_of_unknown_conversation_are_not_found() {
    let temp_file = NamedTempFile::new().unwrap();
    let (_store, service) = create_test_service(&temp_file).await;
    let missing = ChatError::NotFound {
        kind: Resource::Conversation,
        id: "chat__nope__zzz".to_string(),
    };

    let err = service
        .repository()
        .messages("chat__nope__zzz")
        .await
        .unwrap_err();
    assert_eq!(err, missing);

    let mut feed = service.repository().subscribe_messages("chat__nope__zzz");
    let err = feed.next_event().await.unwrap().unwrap_err();
    assert_eq!(err, missing);
}
