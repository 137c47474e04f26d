use crate::error::ConsumeError;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties, ExchangeKind};
use shared::AmqpConfig;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Receive loop: binds a queue to the inserted-data fanout exchange and
/// forwards every delivery body into the intake buffer.
///
/// Deliveries are acknowledged on receipt (`no_ack`), so an observation that
/// later fails processing is lost rather than redelivered. The prefetch
/// window plus the intake capacity bound how many deliveries are in flight:
/// when the pipeline stalls, `send` blocks, consumption stops, and the
/// broker stops delivering.
pub async fn consume_uplinks(
    config: &AmqpConfig,
    intake: Sender<Vec<u8>>,
    shutdown: CancellationToken,
) -> Result<(), ConsumeError> {
    let connection = Connection::connect(&config.url(), ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;

    channel
        .exchange_declare(
            &config.exchange,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    let queue = channel
        .queue_declare(
            &config.queue,
            QueueDeclareOptions::default(),
            FieldTable::default(),
        )
        .await?;

    channel
        .basic_qos(config.prefetch, BasicQosOptions::default())
        .await?;

    channel
        .queue_bind(
            queue.name().as_str(),
            &config.exchange,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let mut consumer = channel
        .basic_consume(
            queue.name().as_str(),
            "channel_processor",
            BasicConsumeOptions {
                no_ack: true,
                ..BasicConsumeOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    info!(
        exchange = config.exchange,
        queue = config.queue,
        prefetch = config.prefetch,
        "AMQP consumer started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested, stopping AMQP consumer");
                break;
            }
            delivery = consumer.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        if intake.send(delivery.data).await.is_err() {
                            return Err(ConsumeError::IntakeClosed);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = ?e, "error receiving AMQP delivery");
                    }
                    None => {
                        info!("AMQP consumer stream closed by broker");
                        break;
                    }
                }
            }
        }
    }

    // Returning drops the intake sender, which lets the pipeline drain what
    // is buffered and exit.
    Ok(())
}
