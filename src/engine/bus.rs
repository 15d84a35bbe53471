use std::collections::VecDeque;

use crate::engine::events::{Event, FillEvent, MarketEvent, OrderEvent, SignalEvent};

/// Tail-append event queue handed to handlers during dispatch.
///
/// Events published while handling are enqueued behind everything already
/// waiting, preserving FIFO order.
#[derive(Debug, Default)]
pub struct EventQueue {
    pub(crate) events: VecDeque<Event>,
}

impl EventQueue {
    pub fn publish(&mut self, event: impl Into<Event>) {
        self.events.push_back(event.into());
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A subscriber in the event engine. Subscriptions are typed: a component
/// overrides the methods for the event kinds it consumes and leaves the
/// rest as no-ops. Handlers may publish new events during handling; they
/// are dispatched after everything already queued.
pub trait EventHandler {
    fn on_market(&mut self, _event: &MarketEvent, _queue: &mut EventQueue) {}

    fn on_signal(&mut self, _event: &SignalEvent, _queue: &mut EventQueue) {}

    fn on_order(&mut self, _event: &OrderEvent, _queue: &mut EventQueue) {}

    fn on_fill(&mut self, _event: &FillEvent, _queue: &mut EventQueue) {}
}

/// Single-threaded, single-queue, cooperative event dispatcher.
///
/// Strictly serial: one event at a time, every subscriber invoked in
/// registration order. Portfolio and execution state correctness depends
/// on this serialization; the loop must not be parallelized.
#[derive(Debug, Default)]
pub struct EventEngine {
    queue: EventQueue,
}

impl EventEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pulls each source event, publishes it, and drains the queue to
    /// empty before pulling the next.
    pub fn run<I>(&mut self, source: I, handlers: &mut [&mut dyn EventHandler])
    where
        I: IntoIterator<Item = MarketEvent>,
    {
        tracing::debug!("Starting event loop");
        for market_event in source {
            self.queue.publish(market_event);
            self.drain(handlers);
        }
        tracing::debug!("Event loop finished");
    }

    /// Pops one event and invokes every subscriber of its kind in
    /// registration order. Returns `false` when the queue is empty.
    pub fn step(&mut self, handlers: &mut [&mut dyn EventHandler]) -> bool {
        let Some(event) = self.queue.events.pop_front() else {
            return false;
        };
        for handler in handlers.iter_mut() {
            match &event {
                Event::Market(e) => handler.on_market(e, &mut self.queue),
                Event::Signal(e) => handler.on_signal(e, &mut self.queue),
                Event::Order(e) => handler.on_order(e, &mut self.queue),
                Event::Fill(e) => handler.on_fill(e, &mut self.queue),
            }
        }
        true
    }

    /// Processes all events currently queued, including any published
    /// during handling.
    pub fn drain(&mut self, handlers: &mut [&mut dyn EventHandler]) {
        while self.step(handlers) {}
    }

    /// Direct access for drivers that enqueue events between runs.
    pub fn queue_mut(&mut self) -> &mut EventQueue {
        &mut self.queue
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::events::{Direction, OrderType, SignalKind};

    fn market(time: i64, close: f64) -> MarketEvent {
        MarketEvent {
            time,
            symbol: "TEST".to_string(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        }
    }

    /// Emits a LONG signal on the first bar, records everything it sees.
    #[derive(Default)]
    struct Probe {
        markets: Vec<i64>,
        signals: Vec<i64>,
        orders: Vec<i64>,
        fired: bool,
    }

    impl EventHandler for Probe {
        fn on_market(&mut self, event: &MarketEvent, queue: &mut EventQueue) {
            self.markets.push(event.time);
            if !self.fired {
                self.fired = true;
                queue.publish(SignalEvent {
                    time: event.time,
                    symbol: event.symbol.clone(),
                    kind: SignalKind::Long,
                    strength: 1.0,
                    strategy_id: "probe",
                });
            }
        }

        fn on_signal(&mut self, event: &SignalEvent, queue: &mut EventQueue) {
            self.signals.push(event.time);
            queue.publish(OrderEvent {
                time: event.time,
                symbol: event.symbol.clone(),
                order_type: OrderType::Market,
                limit_price: None,
                quantity: 1.0,
                direction: Direction::Buy,
            });
        }

        fn on_order(&mut self, event: &OrderEvent, _queue: &mut EventQueue) {
            self.orders.push(event.time);
        }
    }

    #[test]
    fn cascade_drains_before_the_next_source_event() {
        let mut probe = Probe::default();
        let mut engine = EventEngine::new();

        engine.run(
            vec![market(1, 100.0), market(2, 101.0)],
            &mut [&mut probe],
        );

        // The signal and order triggered by bar 1 dispatch before bar 2.
        assert_eq!(probe.markets, vec![1, 2]);
        assert_eq!(probe.signals, vec![1]);
        assert_eq!(probe.orders, vec![1]);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        #[derive(Default)]
        struct Tagger {
            tag: u8,
        }
        // Shared log of (tag, time) to observe inter-handler ordering.
        thread_local! {
            static LOG: std::cell::RefCell<Vec<u8>> = const { std::cell::RefCell::new(Vec::new()) };
        }
        impl EventHandler for Tagger {
            fn on_market(&mut self, _event: &MarketEvent, _queue: &mut EventQueue) {
                LOG.with(|log| log.borrow_mut().push(self.tag));
            }
        }

        let mut first = Tagger { tag: 1 };
        let mut second = Tagger { tag: 2 };
        let mut engine = EventEngine::new();
        engine.run(vec![market(1, 100.0)], &mut [&mut first, &mut second]);

        LOG.with(|log| assert_eq!(*log.borrow(), vec![1, 2]));
    }

    #[test]
    fn step_on_empty_queue_is_false() {
        let mut engine = EventEngine::new();
        assert!(!engine.step(&mut []));
    }
}
