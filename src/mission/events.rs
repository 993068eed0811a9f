//! Mission Event Types
//!
//! Gameplay events raised by the host simulation, and the subscription bus
//! mission handlers register against while their mission is active.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::definition::MissionId;

/// Kinds of gameplay events a handler can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ItemPickup,
    ItemCreated,
    NpcKill,
    NpcHit,
    NpcChat,
    DialogueEnd,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::ItemPickup,
        EventKind::ItemCreated,
        EventKind::NpcKill,
        EventKind::NpcHit,
        EventKind::NpcChat,
        EventKind::DialogueEnd,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "item_pickup" | "pickup" | "collect" => Some(EventKind::ItemPickup),
            "item_created" | "craft" => Some(EventKind::ItemCreated),
            "npc_kill" | "kill" => Some(EventKind::NpcKill),
            "npc_hit" | "hit" => Some(EventKind::NpcHit),
            "npc_chat" | "talk" => Some(EventKind::NpcChat),
            "dialogue_end" | "dialogue" => Some(EventKind::DialogueEnd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ItemPickup => "item_pickup",
            EventKind::ItemCreated => "item_created",
            EventKind::NpcKill => "npc_kill",
            EventKind::NpcHit => "npc_hit",
            EventKind::NpcChat => "npc_chat",
            EventKind::DialogueEnd => "dialogue_end",
        }
    }
}

/// A gameplay event, as raised by the host for one player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// Player picked up a stack (possibly a partial one)
    ItemPickup { item_id: String, count: u32 },

    /// Player crafted or otherwise created an item
    ItemCreated { item_id: String, count: u32 },

    /// Player killed an NPC of the given kind
    NpcKill { npc_kind: String },

    /// Player damaged an NPC
    NpcHit { npc_kind: String, damage: u32 },

    /// Player started chatting with an NPC
    NpcChat { npc_id: String, npc_kind: String },

    /// A dialogue sequence finished playing
    DialogueEnd { key: String },
}

impl GameEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GameEvent::ItemPickup { .. } => EventKind::ItemPickup,
            GameEvent::ItemCreated { .. } => EventKind::ItemCreated,
            GameEvent::NpcKill { .. } => EventKind::NpcKill,
            GameEvent::NpcHit { .. } => EventKind::NpcHit,
            GameEvent::NpcChat { .. } => EventKind::NpcChat,
            GameEvent::DialogueEnd { .. } => EventKind::DialogueEnd,
        }
    }

    /// The item id, NPC kind or dialogue key the event concerns
    pub fn target(&self) -> &str {
        match self {
            GameEvent::ItemPickup { item_id, .. } | GameEvent::ItemCreated { item_id, .. } => item_id,
            GameEvent::NpcKill { npc_kind } | GameEvent::NpcHit { npc_kind, .. } => npc_kind,
            GameEvent::NpcChat { npc_kind, .. } => npc_kind,
            GameEvent::DialogueEnd { key } => key,
        }
    }

    /// Default progress amount carried by the event
    pub fn amount(&self) -> u32 {
        match self {
            GameEvent::ItemPickup { count, .. } | GameEvent::ItemCreated { count, .. } => *count,
            GameEvent::NpcHit { damage, .. } => *damage,
            _ => 1,
        }
    }
}

/// Handle returned by `EventBus::subscribe`, released by `unsubscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Who receives an event when it is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscriber {
    pub mission: MissionId,
}

/// The host's event hooks
///
/// The engine never owns the bus; it registers and unregisters mission
/// subscriptions and asks which missions listen to a given event kind.
pub trait EventBus {
    fn subscribe(&mut self, kind: EventKind, subscriber: Subscriber) -> SubscriptionHandle;

    /// Returns false if the handle was unknown
    fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool;

    /// Subscribers for an event kind, in subscription order
    fn subscribers(&self, kind: EventKind) -> Vec<Subscriber>;

    /// Number of live subscriptions held for a mission
    fn subscription_count(&self, mission: MissionId) -> usize;
}

/// In-process event bus for a single player
#[derive(Debug, Default)]
pub struct LocalEventBus {
    next_handle: u64,
    subscriptions: HashMap<SubscriptionHandle, (EventKind, Subscriber)>,
    by_kind: HashMap<EventKind, Vec<SubscriptionHandle>>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl EventBus for LocalEventBus {
    fn subscribe(&mut self, kind: EventKind, subscriber: Subscriber) -> SubscriptionHandle {
        self.next_handle += 1;
        let handle = SubscriptionHandle(self.next_handle);
        self.subscriptions.insert(handle, (kind, subscriber));
        self.by_kind.entry(kind).or_default().push(handle);
        handle
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        match self.subscriptions.remove(&handle) {
            Some((kind, _)) => {
                if let Some(handles) = self.by_kind.get_mut(&kind) {
                    handles.retain(|h| *h != handle);
                }
                true
            }
            None => false,
        }
    }

    fn subscribers(&self, kind: EventKind) -> Vec<Subscriber> {
        self.by_kind
            .get(&kind)
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(|h| self.subscriptions.get(h).map(|(_, s)| *s))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn subscription_count(&self, mission: MissionId) -> usize {
        self.subscriptions
            .values()
            .filter(|(_, s)| s.mission == mission)
            .count()
    }
}
