//! Typed observer registry for [`DomainEvent`]s.

use std::{
    any::Any,
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
};

use chat_shared::events::{
    ColorChanged, DomainEvent, EmojiChanged, EventKind, InboxStatus, MessageReceived,
    NicknameChanged, ParticipantRemoved, ParticipantsAdded, TitleChanged, UnknownEvent,
};
use tracing::{error, info};

use crate::error::DispatchFault;

pub type EventHandler = Box<dyn Fn(&DomainEvent) -> anyhow::Result<()> + Send + Sync>;

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<EventKind, Vec<EventHandler>>,
}

macro_rules! typed_subscription {
    ($($method:ident => $variant:ident($payload:ty)),+ $(,)?) => {
        impl EventDispatcher {
            $(
                pub fn $method<F>(&mut self, handler: F)
                where
                    F: Fn(&$payload) -> anyhow::Result<()> + Send + Sync + 'static,
                {
                    self.subscribe(EventKind::$variant, move |event| match event {
                        DomainEvent::$variant(payload) => handler(payload),
                        _ => Ok(()),
                    });
                }
            )+
        }
    };
}

typed_subscription!(
    on_message_received => MessageReceived(MessageReceived),
    on_color_changed => ColorChanged(ColorChanged),
    on_emoji_changed => EmojiChanged(EmojiChanged),
    on_title_changed => TitleChanged(TitleChanged),
    on_nickname_changed => NicknameChanged(NicknameChanged),
    on_participants_added => ParticipantsAdded(ParticipantsAdded),
    on_participant_removed => ParticipantRemoved(ParticipantRemoved),
    on_inbox_status => InboxStatus(InboxStatus),
    on_unknown => Unknown(UnknownEvent),
);

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher with one `info` logging handler per event kind.
    pub fn with_logging_handlers() -> Self {
        let mut dispatcher = Self::new();
        for kind in EventKind::ALL {
            dispatcher.subscribe(kind, log_event);
        }
        dispatcher
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(&DomainEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Runs every handler for the event's kind in registration order. A failing
    /// or panicking handler is logged and the rest still run.
    pub fn publish(&self, event: &DomainEvent) -> DispatchSummary {
        let kind = event.kind();
        let mut summary = DispatchSummary::default();
        let Some(handlers) = self.handlers.get(&kind) else {
            return summary;
        };

        for (index, handler) in handlers.iter().enumerate() {
            match invoke(handler, event) {
                Ok(()) => summary.delivered += 1,
                Err(fault) => {
                    summary.failed += 1;
                    error!("dispatcher: handler index={index} kind={kind:?} {fault}");
                }
            }
        }
        summary
    }

    pub fn publish_all<'a>(&self, events: impl IntoIterator<Item = &'a DomainEvent>) -> DispatchSummary {
        events
            .into_iter()
            .fold(DispatchSummary::default(), |mut total, event| {
                let summary = self.publish(event);
                total.delivered += summary.delivered;
                total.failed += summary.failed;
                total
            })
    }
}

fn invoke(handler: &EventHandler, event: &DomainEvent) -> Result<(), DispatchFault> {
    match catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(DispatchFault::Failed(err)),
        Err(panic) => Err(DispatchFault::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".into()
    }
}

fn log_event(event: &DomainEvent) -> anyhow::Result<()> {
    match event {
        DomainEvent::MessageReceived(message) => info!(
            "event: message id={} from={} thread={} kind={:?} body={:?}",
            message.message_id, message.author_id, message.thread_id, message.thread_kind, message.body
        ),
        DomainEvent::ColorChanged(change) => info!(
            "event: color changed to {} by={} thread={}",
            change.new_color, change.author_id, change.thread_id
        ),
        DomainEvent::EmojiChanged(change) => info!(
            "event: emoji changed to {} by={} thread={}",
            change.new_emoji, change.author_id, change.thread_id
        ),
        DomainEvent::TitleChanged(change) => info!(
            "event: title changed to {:?} by={} thread={}",
            change.new_title, change.author_id, change.thread_id
        ),
        DomainEvent::NicknameChanged(change) => info!(
            "event: nickname of {} changed to {:?} by={} thread={}",
            change.changed_for, change.new_nickname, change.author_id, change.thread_id
        ),
        DomainEvent::ParticipantsAdded(added) => info!(
            "event: {} participant(s) added by={} thread={}",
            added.added_user_ids.len(),
            added.author_id,
            added.thread_id
        ),
        DomainEvent::ParticipantRemoved(removed) => info!(
            "event: {} removed by={} thread={}",
            removed.removed_user_id, removed.author_id, removed.thread_id
        ),
        DomainEvent::InboxStatus(inbox) => info!(
            "event: inbox unseen={} unread={} recent_unread={}",
            inbox.unseen_count, inbox.unread_count, inbox.recent_unread_count
        ),
        DomainEvent::Unknown(unknown) => info!("event: unknown raw={}", unknown.raw),
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
