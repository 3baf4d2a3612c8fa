use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use super::Error;

pub fn reporter() -> Reporter {
    Reporter {
        controller: "tsdb-operator".into(),
        instance: std::env::var("POD_NAME").ok(),
    }
}

pub fn recorder_for<K>(client: Client, instance: &K) -> Recorder
where
    K: Resource<DynamicType = ()>,
{
    Recorder::new(client, reporter(), instance.object_ref(&()))
}

pub async fn warn<K>(client: Client, instance: &K, reason: &str, note: String) -> Result<(), Error>
where
    K: Resource<DynamicType = ()>,
{
    recorder_for(client, instance)
        .publish(Event {
            type_: EventType::Warning,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconciling".into(),
            secondary: None,
        })
        .await?;
    Ok(())
}

pub async fn normal<K>(client: Client, instance: &K, reason: &str, note: String) -> Result<(), Error>
where
    K: Resource<DynamicType = ()>,
{
    recorder_for(client, instance)
        .publish(Event {
            type_: EventType::Normal,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconciling".into(),
            secondary: None,
        })
        .await?;
    Ok(())
}
