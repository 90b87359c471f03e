//! Topic-indexed publish/subscribe.
//!
//! Each topic is a tokio broadcast channel: every subscriber sees publishes
//! in order, a failing or slow subscriber never blocks the publisher or its
//! peers, and dropping a receiver unsubscribes (one trailing event may still
//! be observed).

use rtd_core::{ArbitrageOpportunity, Exchange, Quote};
use compact_str::CompactString;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Event topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    QuoteUpdated,
    ArbitrageFound,
    SupervisorExhausted,
}

/// Typed event payloads.
#[derive(Debug, Clone)]
pub enum Event {
    QuoteUpdated {
        symbol: CompactString,
        exchange: Exchange,
        quote: Quote,
    },
    ArbitrageFound {
        opportunities: Vec<ArbitrageOpportunity>,
    },
    SupervisorExhausted {
        exchange: Exchange,
    },
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::QuoteUpdated { .. } => Topic::QuoteUpdated,
            Event::ArbitrageFound { .. } => Topic::ArbitrageFound,
            Event::SupervisorExhausted { .. } => Topic::SupervisorExhausted,
        }
    }
}

/// Pub/sub hub shared by the book, the detector and the embedder.
#[derive(Debug)]
pub struct EventBus {
    quote_updated: broadcast::Sender<Event>,
    arbitrage_found: broadcast::Sender<Event>,
    supervisor_exhausted: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (quote_updated, _) = broadcast::channel(capacity);
        let (arbitrage_found, _) = broadcast::channel(capacity);
        let (supervisor_exhausted, _) = broadcast::channel(capacity);
        Self {
            quote_updated,
            arbitrage_found,
            supervisor_exhausted,
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::QuoteUpdated => &self.quote_updated,
            Topic::ArbitrageFound => &self.arbitrage_found,
            Topic::SupervisorExhausted => &self.supervisor_exhausted,
        }
    }

    /// Publish to the event's topic. A topic with no subscribers is fine.
    pub fn publish(&self, event: Event) {
        let _ = self.sender(event.topic()).send(event);
    }

    /// Subscribe to one topic.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.sender(topic).subscribe()
    }

    /// Subscribe with a handler, drained on its own task so a slow handler
    /// cannot stall delivery to other subscribers. The task ends when the bus
    /// is dropped.
    pub fn subscribe_fn<F>(&self, topic: Topic, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(Event) + Send + 'static,
    {
        let mut rx = self.subscribe(topic);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("event subscriber lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.sender(topic).receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exhausted(exchange: Exchange) -> Event {
        Event::SupervisorExhausted { exchange }
    }

    #[tokio::test]
    async fn test_delivery_preserves_publish_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe(Topic::SupervisorExhausted);

        bus.publish(exhausted(Exchange::Binance));
        bus.publish(exhausted(Exchange::Bybit));
        bus.publish(exhausted(Exchange::Okx));

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let Event::SupervisorExhausted { exchange } = rx.recv().await.unwrap() {
                seen.push(exchange);
            }
        }
        assert_eq!(seen, vec![Exchange::Binance, Exchange::Bybit, Exchange::Okx]);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = EventBus::default();
        let mut quote_rx = bus.subscribe(Topic::QuoteUpdated);

        bus.publish(exhausted(Exchange::Binance));
        assert!(matches!(
            quote_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_affect_peers() {
        let bus = EventBus::default();
        let dropped = bus.subscribe(Topic::SupervisorExhausted);
        let mut kept = bus.subscribe(Topic::SupervisorExhausted);
        drop(dropped);

        bus.publish(exhausted(Exchange::Deribit));
        let event = kept.recv().await.unwrap();
        assert!(matches!(
            event,
            Event::SupervisorExhausted {
                exchange: Exchange::Deribit
            }
        ));
    }

    #[tokio::test]
    async fn test_subscribe_fn_receives_events() {
        let bus = EventBus::default();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _task = bus.subscribe_fn(Topic::SupervisorExhausted, move |event| {
            let _ = tx.send(event);
        });

        bus.publish(exhausted(Exchange::Phemex));
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            Event::SupervisorExhausted {
                exchange: Exchange::Phemex
            }
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(exhausted(Exchange::Mexc));
        assert_eq!(bus.subscriber_count(Topic::SupervisorExhausted), 0);
    }
}
