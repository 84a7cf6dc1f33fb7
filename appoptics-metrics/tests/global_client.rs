//! The global client is process-wide state, so everything touching it lives
//! in this one test.

mod common;

use appoptics_metrics::{global, Adapter, MetricsError, Persistence, QueueOptions};

use common::ScriptedTransport;

#[tokio::test]
async fn test_global_client_lifecycle() {
    global::reset();
    assert!(global::api_key().is_none());
    assert!(matches!(
        global::connection(),
        Err(MetricsError::CredentialsMissing)
    ));
    assert_eq!(global::api_endpoint(), "https://api.appoptics.com");

    global::authenticate("foo");
    global::set_persistence(Persistence::Test);
    assert!(global::submit([("foo", 123.0)]).await.unwrap());
    let persisted = global::persister().unwrap().persisted().unwrap();
    assert_eq!(persisted.gauges[0].name, "foo");

    // queues without a client use the global one
    let queue = global::new_queue(QueueOptions::default());
    assert_eq!(queue.client(), global::client());

    // default adapter applies to clients without their own
    let transport = ScriptedTransport::statuses(&[]);
    global::set_default_adapter(Adapter::Custom(transport.clone()));
    assert_eq!(global::adapter().name(), "scripted/1.0");
    global::set_persistence(Persistence::Direct);
    global::set_api_endpoint("http://localhost:9296");
    assert!(global::submit([("bar", 1.0)]).await.unwrap());
    assert_eq!(transport.requests().len(), 1);
    let user_agent = global::connection().unwrap().user_agent().unwrap();
    assert!(user_agent.ends_with("direct-scripted/1.0"));

    global::reset_default_adapter();
    assert_eq!(global::adapter(), Adapter::Reqwest);

    global::set_agent_identifier(&["my-agent"]).unwrap();
    assert_eq!(global::agent_identifier().as_deref(), Some("my-agent"));

    global::reset();
    assert!(global::api_key().is_none());
    assert!(global::agent_identifier().is_none());
    assert_eq!(global::persistence(), Persistence::Direct);
}
