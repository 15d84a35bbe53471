use strum::Display;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

/// Order pricing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Strategy intent carried by a [`SignalEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SignalKind {
    Long,
    Exit,
    Short,
}

/// One bar of market data, emitted per row of the execution frame.
#[derive(Debug, Clone)]
pub struct MarketEvent {
    pub time: i64,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A strategy's trading intent.
#[derive(Debug, Clone)]
pub struct SignalEvent {
    pub time: i64,
    pub symbol: String,
    pub kind: SignalKind,
    pub strength: f64,
    pub strategy_id: &'static str,
}

/// A sized order emitted by the portfolio.
#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub time: i64,
    pub symbol: String,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub quantity: f64,
    pub direction: Direction,
}

/// An execution report emitted by the execution handler.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub time: i64,
    pub symbol: String,
    pub quantity: f64,
    pub direction: Direction,
    pub fill_price: f64,
    pub commission: f64,
}

/// The four event kinds flowing through the event engine.
#[derive(Debug, Clone)]
pub enum Event {
    Market(MarketEvent),
    Signal(SignalEvent),
    Order(OrderEvent),
    Fill(FillEvent),
}

impl From<MarketEvent> for Event {
    fn from(e: MarketEvent) -> Self {
        Event::Market(e)
    }
}

impl From<SignalEvent> for Event {
    fn from(e: SignalEvent) -> Self {
        Event::Signal(e)
    }
}

impl From<OrderEvent> for Event {
    fn from(e: OrderEvent) -> Self {
        Event::Order(e)
    }
}

impl From<FillEvent> for Event {
    fn from(e: FillEvent) -> Self {
        Event::Fill(e)
    }
}
