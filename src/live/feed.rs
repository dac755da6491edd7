//! Subscription plumbing between the streaming service and the live stores.
//! One pump task per topic applies events in arrival order; dropping the
//! feeds aborts the pumps, which closes the receivers and unsubscribes.

use crate::dashboard::config::DashboardConfig;
use crate::dashboard::registry::WidgetKind;
use crate::live::store::{Insight, InsightStore, QuoteStore, QuoteTick};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Server-side stream a widget kind can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Quotes,
    Insights,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Quotes => "quotes",
            Topic::Insights => "insights",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One push from the streaming service, already decoded.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Insights(Vec<Insight>),
    Quotes(Vec<QuoteTick>),
}

impl LiveEvent {
    fn kind(&self) -> &'static str {
        match self {
            LiveEvent::Insights(_) => "insights",
            LiveEvent::Quotes(_) => "quotes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("subscription to '{topic}' failed: {message}")]
pub struct SubscribeError {
    pub topic: String,
    pub message: String,
}

/// The websocket service boundary. Dropping the returned receiver is the
/// unsubscribe signal.
#[async_trait]
pub trait StreamingApi: Send + Sync {
    async fn subscribe(&self, topic: Topic) -> Result<mpsc::Receiver<LiveEvent>, SubscribeError>;
}

/// Topics the widgets on a config actually need, in first-use order with
/// duplicates collapsed. Unknown widget kinds need no stream.
pub fn topics_for(config: &DashboardConfig) -> Vec<Topic> {
    let mut topics = Vec::new();
    for widget in &config.widgets {
        let Some(kind) = WidgetKind::from_tag(&widget.kind) else {
            continue;
        };
        if let Some(topic) = kind.descriptor().topic {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
    }
    topics
}

/// Live stores plus the pump tasks feeding them.
pub struct LiveFeeds {
    insights: Arc<InsightStore>,
    quotes: Arc<QuoteStore>,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveFeeds {
    /// Subscribe to each topic once and start pumping events into the
    /// matching store. A failed subscription aborts the pumps already
    /// started before the error is returned.
    pub async fn connect(
        api: Arc<dyn StreamingApi>,
        topics: &[Topic],
    ) -> Result<Self, SubscribeError> {
        let insights = Arc::new(InsightStore::new());
        let quotes = Arc::new(QuoteStore::new());
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let mut connected: Vec<Topic> = Vec::new();

        for &topic in topics {
            if connected.contains(&topic) {
                continue;
            }
            connected.push(topic);
            let mut rx = match api.subscribe(topic).await {
                Ok(rx) => rx,
                Err(err) => {
                    for task in tasks.drain(..) {
                        task.abort();
                    }
                    return Err(err);
                }
            };
            let insights = Arc::clone(&insights);
            let quotes = Arc::clone(&quotes);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match (topic, event) {
                        (Topic::Insights, LiveEvent::Insights(batch)) => insights.push(&batch),
                        (Topic::Quotes, LiveEvent::Quotes(ticks)) => quotes.apply(&ticks),
                        (topic, event) => {
                            tracing::warn!(
                                topic = %topic,
                                event = event.kind(),
                                "dropping event that does not match its topic"
                            );
                        }
                    }
                }
            }));
        }

        Ok(Self {
            insights,
            quotes,
            tasks,
        })
    }

    pub fn insights(&self) -> &Arc<InsightStore> {
        &self.insights
    }

    pub fn quotes(&self) -> &Arc<QuoteStore> {
        &self.quotes
    }

    pub fn active_feeds(&self) -> usize {
        self.tasks.len()
    }

    /// Abort the pumps. Receivers drop with them, which the service sees as
    /// an unsubscribe.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for LiveFeeds {
    fn drop(&mut self) {
        self.shutdown();
    }
}
