//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;

use cruise_mesh_core::{Message, MessageId, Timestamp, TopicId};

/// Generate a MessageId.
pub fn message_id() -> impl Strategy<Value = MessageId> {
    "[A-Za-z0-9]{1,12}".prop_map(MessageId::from)
}

/// Generate a TopicId, the general topic included.
pub fn topic_id() -> impl Strategy<Value = TopicId> {
    prop_oneof![
        Just(TopicId::general()),
        "[a-z][a-z0-9-]{0,15}".prop_map(TopicId::from),
    ]
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    0i64..=1_900_000_000_000i64
}

/// Generate a message with an arbitrary id.
pub fn message() -> impl Strategy<Value = Message> {
    (message_id(), ".{0,64}", "[a-z]{0,8}", topic_id(), timestamp()).prop_map(
        |(id, content, sender, topic, ts)| Message::new(id, content, sender, topic, ts),
    )
}

/// Generate up to `max` messages with distinct ids.
pub fn distinct_messages(max: usize) -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec(message(), 0..=max).prop_map(|messages| {
        let mut seen = BTreeSet::new();
        messages
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect()
    })
}

/// Two replicas' holdings drawn from one shared pool, so they overlap.
#[derive(Debug, Clone)]
pub struct ReplicaPair {
    /// Messages held by the first replica.
    pub left: Vec<Message>,
    /// Messages held by the second replica.
    pub right: Vec<Message>,
}

impl ReplicaPair {
    /// Ids the two replicas should hold once converged.
    pub fn union_ids(&self) -> BTreeSet<MessageId> {
        self.left
            .iter()
            .chain(self.right.iter())
            .map(|m| m.id.clone())
            .collect()
    }
}

impl Arbitrary for ReplicaPair {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        distinct_messages(24)
            .prop_flat_map(|pool| {
                let n = pool.len();
                (
                    Just(pool),
                    prop::collection::vec(any::<bool>(), n),
                    prop::collection::vec(any::<bool>(), n),
                )
            })
            .prop_map(|(pool, in_left, in_right)| {
                let pick = |mask: &[bool]| {
                    pool.iter()
                        .zip(mask)
                        .filter(|(_, keep)| **keep)
                        .map(|(m, _)| m.clone())
                        .collect::<Vec<_>>()
                };
                ReplicaPair {
                    left: pick(&in_left),
                    right: pick(&in_right),
                }
            })
            .boxed()
    }
}
