//! Channel: one independent playout context
//!
//! A channel binds a video format to a producer device, the compositor and
//! a set of consumers. The device task ticks at the channel rate; every
//! tick's layer stack is flattened by the compositor and fanned out to each
//! consumer's bounded queue. A consumer that fails a send is removed from
//! the channel; the tick never stalls on a slow consumer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use playout_common::events::{EventBus, PlayoutEvent};
use playout_common::format::VideoFormatDesc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::consumer::Consumer;
use crate::error::Result;
use crate::frame::{Frame, FrameFactory};
use crate::mixer::SoftwareMixer;
use crate::producer::device::{FrameSink, ProducerDevice};
use crate::producer::SharedProducer;

type ConsumerList = Arc<Mutex<Vec<Box<dyn Consumer>>>>;

/// One playout channel.
pub struct Channel {
    id: Uuid,
    desc: VideoFormatDesc,
    device: ProducerDevice,
    consumers: ConsumerList,
    events: EventBus,
}

impl Channel {
    pub fn new(desc: VideoFormatDesc, events: EventBus) -> Channel {
        let id = Uuid::new_v4();
        let factory = FrameFactory::new(desc.clone());
        let consumers: ConsumerList = Arc::new(Mutex::new(Vec::new()));

        let sink = ChannelSink {
            channel_id: id,
            mixer: SoftwareMixer::new(Arc::clone(&factory)),
            consumers: Arc::clone(&consumers),
            events: events.clone(),
        };
        let device = ProducerDevice::new(factory, Box::new(sink));

        events.publish(PlayoutEvent::ChannelStarted {
            channel_id: id,
            format: format!("{:?}", desc.format),
            timestamp: Utc::now(),
        });
        info!("channel[{id}]: started at {:.3} fps", desc.fps());

        Channel { id, desc, device, consumers, events }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn desc(&self) -> &VideoFormatDesc {
        &self.desc
    }

    pub fn device(&self) -> &ProducerDevice {
        &self.device
    }

    /// Load a producer into a layer.
    pub async fn load(&self, layer: i32, producer: SharedProducer, auto_play: bool) -> Result<()> {
        let name = producer.lock().await.print_name();
        self.device.load(layer, producer, auto_play).await?;
        self.events.publish(PlayoutEvent::LayerLoaded {
            channel_id: self.id,
            layer,
            producer: name,
            auto_play,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub fn play(&self, layer: i32) -> Result<()> {
        self.device.play(layer)
    }

    pub fn pause(&self, layer: i32) -> Result<()> {
        self.device.pause(layer)
    }

    pub fn stop(&self, layer: i32) -> Result<()> {
        self.device.stop(layer)
    }

    pub fn clear(&self, layer: i32) -> Result<()> {
        self.device.clear(layer)
    }

    pub fn clear_all(&self) -> Result<()> {
        self.device.clear_all()
    }

    /// Attach a consumer; it starts receiving composites on the next tick.
    pub async fn add_consumer(&self, consumer: Box<dyn Consumer>) {
        let name = consumer.print_name();
        self.consumers.lock().await.push(consumer);
        self.events.publish(PlayoutEvent::ConsumerAdded {
            channel_id: self.id,
            consumer: name,
            timestamp: Utc::now(),
        });
    }

    /// Detach a consumer by print-name, closing it.
    pub async fn remove_consumer(&self, name: &str) -> Result<bool> {
        let mut consumers = self.consumers.lock().await;
        let Some(position) = consumers.iter().position(|c| c.print_name() == name) else {
            return Ok(false);
        };
        let mut consumer = consumers.remove(position);
        drop(consumers);

        consumer.close().await?;
        self.events.publish(PlayoutEvent::ConsumerRemoved {
            channel_id: self.id,
            consumer: name.to_string(),
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    /// Cooperative shutdown: the current tick completes, then consumers are
    /// drained and closed in turn.
    pub async fn shutdown(self) {
        self.device.shutdown().await;
        let mut consumers = self.consumers.lock().await;
        for consumer in consumers.iter_mut() {
            if let Err(e) = consumer.close().await {
                warn!("channel[{}]: consumer close failed: {e}", self.id);
            }
        }
        consumers.clear();

        self.events.publish(PlayoutEvent::ChannelStopped {
            channel_id: self.id,
            timestamp: Utc::now(),
        });
        info!("channel[{}]: stopped", self.id);
    }
}

struct ChannelSink {
    channel_id: Uuid,
    mixer: SoftwareMixer,
    consumers: ConsumerList,
    events: EventBus,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let output = Arc::new(self.mixer.composite(&frame));

        let mut consumers = self.consumers.lock().await;
        let mut failed = Vec::new();
        for (index, consumer) in consumers.iter_mut().enumerate() {
            if let Err(e) = consumer.send(Arc::clone(&output)) {
                warn!(
                    "channel[{}]: {} failed, removing consumer: {e}",
                    self.channel_id,
                    consumer.print_name()
                );
                failed.push(index);
            }
        }
        for index in failed.into_iter().rev() {
            let consumer = consumers.remove(index);
            self.events.publish(PlayoutEvent::ConsumerRemoved {
                channel_id: self.channel_id,
                consumer: consumer.print_name(),
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }
}
