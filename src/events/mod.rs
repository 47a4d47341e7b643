use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// The events the costing engine can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CostLayerCreated {
        layer_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: Decimal,
        unit_cost: Decimal,
    },
    CostLayerExhausted {
        layer_id: Uuid,
        product_id: Uuid,
    },
    LayersConsumed {
        product_id: Uuid,
        warehouse_id: Uuid,
        method: String,
        quantity: Decimal,
        total_cogs: Decimal,
        layers_touched: usize,
    },
    CostingMethodChanged {
        product_id: Uuid,
        old_method: Option<String>,
        new_method: String,
    },
    StandardCostSet {
        product_id: Uuid,
        standard_cost: Decimal,
    },
    InsufficientInventoryRejected {
        product_id: Uuid,
        warehouse_id: Uuid,
        requested: Decimal,
        available: Decimal,
    },

    // Generic event for custom messages
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    /// Create a generic event with string data
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Processes incoming events until the channel closes.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::CostLayerCreated {
                layer_id,
                product_id,
                quantity,
                unit_cost,
                ..
            } => {
                info!(
                    %layer_id, %product_id, %quantity, %unit_cost,
                    "Cost layer created"
                );
            }
            Event::CostLayerExhausted {
                layer_id,
                product_id,
            } => {
                info!(%layer_id, %product_id, "Cost layer fully consumed");
            }
            Event::LayersConsumed {
                product_id,
                method,
                quantity,
                total_cogs,
                layers_touched,
                ..
            } => {
                info!(
                    %product_id, %method, %quantity, %total_cogs, layers_touched,
                    "Consumption recorded"
                );
            }
            Event::CostingMethodChanged {
                product_id,
                old_method,
                new_method,
            } => {
                info!(
                    %product_id,
                    old_method = old_method.as_deref().unwrap_or("(default)"),
                    %new_method,
                    "Costing method changed"
                );
            }
            Event::StandardCostSet {
                product_id,
                standard_cost,
            } => {
                info!(%product_id, %standard_cost, "Standard cost set");
            }
            Event::InsufficientInventoryRejected {
                product_id,
                warehouse_id,
                requested,
                available,
            } => {
                warn!(
                    %product_id, %warehouse_id, %requested, %available,
                    "Consumption rejected: insufficient inventory"
                );
            }
            Event::Generic {
                message, metadata, ..
            } => {
                if metadata.is_null() {
                    info!("Event: {}", message);
                } else {
                    info!(metadata = %metadata, "Event: {}", message);
                }
            }
        }
    }

    error!("Event channel closed; processing loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn event_sender_delivers_to_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        sender
            .send(Event::StandardCostSet {
                product_id: Uuid::new_v4(),
                standard_cost: dec!(6.0000),
            })
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(Event::StandardCostSet { .. })
        ));
    }

    #[tokio::test]
    async fn event_sender_errors_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        let result = sender.send(Event::with_data("orphaned".into())).await;
        assert!(result.is_err());
    }
}
