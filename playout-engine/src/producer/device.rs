//! Producer device: the per-channel tick scheduler
//!
//! Owns the layer map inside a single command task — the Rust rendition of a
//! single-threaded command executor. All mutations (load/play/pause/stop/
//! clear) post to the task's channel and are applied between ticks, so a
//! mutation enqueued mid-tick takes effect no earlier than the next tick.
//! Queries resolve on the executor via oneshot replies.
//!
//! Each tick collects every layer's frame concurrently (fork-join over the
//! map, ascending layer index = compositing order), wraps the vector in a
//! group frame and forwards it downstream. A failing tick body clears the
//! layer map and the loop re-arms; the device does not die.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameFactory};
use crate::producer::layer::Layer;
use crate::producer::SharedProducer;

/// Downstream receiver of per-tick composite frames.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;
}

enum DeviceCommand {
    Load { layer: i32, producer: SharedProducer, auto_play: bool },
    Play(i32),
    Pause(i32),
    Stop(i32),
    Clear(i32),
    ClearAll,
    Foreground(i32, oneshot::Sender<Option<SharedProducer>>),
    Background(i32, oneshot::Sender<Option<SharedProducer>>),
    Shutdown,
}

/// Handle to a running producer device.
pub struct ProducerDevice {
    tx: mpsc::UnboundedSender<DeviceCommand>,
    factory: Arc<FrameFactory>,
    task: Option<JoinHandle<()>>,
}

impl ProducerDevice {
    /// Spawn the device task ticking at the factory's channel rate, feeding
    /// the given sink.
    pub fn new(factory: Arc<FrameFactory>, sink: Box<dyn FrameSink>) -> ProducerDevice {
        let (tx, rx) = mpsc::unbounded_channel();
        let task_factory = Arc::clone(&factory);
        let task = tokio::spawn(run(rx, task_factory, sink));
        ProducerDevice { tx, factory, task: Some(task) }
    }

    fn post(&self, command: DeviceCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::Producer("producer device stopped".into()))
    }

    /// Initialize a producer against the channel context and load it into a
    /// layer's background (promoting immediately with `auto_play`).
    pub async fn load(
        &self,
        layer: i32,
        producer: SharedProducer,
        auto_play: bool,
    ) -> Result<()> {
        producer.lock().await.initialize(&self.factory).await?;
        self.post(DeviceCommand::Load { layer, producer, auto_play })
    }

    pub fn play(&self, layer: i32) -> Result<()> {
        self.post(DeviceCommand::Play(layer))
    }

    pub fn pause(&self, layer: i32) -> Result<()> {
        self.post(DeviceCommand::Pause(layer))
    }

    /// Stop a layer's foreground. A layer left with no background is removed
    /// from the map before the next tick completes.
    pub fn stop(&self, layer: i32) -> Result<()> {
        self.post(DeviceCommand::Stop(layer))
    }

    pub fn clear(&self, layer: i32) -> Result<()> {
        self.post(DeviceCommand::Clear(layer))
    }

    pub fn clear_all(&self) -> Result<()> {
        self.post(DeviceCommand::ClearAll)
    }

    /// Foreground producer of a layer, resolved on the executor.
    pub async fn foreground(&self, layer: i32) -> Result<Option<SharedProducer>> {
        let (tx, rx) = oneshot::channel();
        self.post(DeviceCommand::Foreground(layer, tx))?;
        rx.await
            .map_err(|_| Error::Producer("producer device stopped".into()))
    }

    /// Background producer of a layer, resolved on the executor.
    pub async fn background(&self, layer: i32) -> Result<Option<SharedProducer>> {
        let (tx, rx) = oneshot::channel();
        self.post(DeviceCommand::Background(layer, tx))?;
        rx.await
            .map_err(|_| Error::Producer("producer device stopped".into()))
    }

    pub fn factory(&self) -> &Arc<FrameFactory> {
        &self.factory
    }

    /// Stop the device task and wait for it to finish its current tick.
    pub async fn shutdown(mut self) {
        let _ = self.post(DeviceCommand::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<DeviceCommand>,
    factory: Arc<FrameFactory>,
    mut sink: Box<dyn FrameSink>,
) {
    let mut layers: BTreeMap<i32, Layer> = BTreeMap::new();
    let mut interval = tokio::time::interval(factory.desc().frame_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("producer-device: started at {:.3} fps", factory.desc().fps());

    loop {
        tokio::select! {
            // Commands drain ahead of the tick so every mutation enqueued
            // before a tick starts is visible to it.
            biased;

            command = rx.recv() => {
                match command {
                    Some(DeviceCommand::Shutdown) | None => break,
                    Some(command) => apply(&mut layers, command).await,
                }
            }

            _ = interval.tick() => {
                if let Err(e) = tick(&mut layers, &factory, sink.as_mut()).await {
                    error!("producer-device: tick failed, clearing layers: {e}");
                    layers.clear();
                }
            }
        }
    }

    info!("producer-device: stopped");
}

async fn apply(layers: &mut BTreeMap<i32, Layer>, command: DeviceCommand) {
    match command {
        DeviceCommand::Load { layer, producer, auto_play } => {
            let name = producer.lock().await.print_name();
            debug!("producer-device: load {name} into layer {layer} (auto_play={auto_play})");
            layers
                .entry(layer)
                .or_insert_with(|| Layer::new(layer))
                .load(producer, auto_play)
                .await;
        }
        DeviceCommand::Play(index) => {
            if let Some(layer) = layers.get_mut(&index) {
                layer.play().await;
            }
        }
        DeviceCommand::Pause(index) => {
            if let Some(layer) = layers.get_mut(&index) {
                layer.pause();
            }
        }
        DeviceCommand::Stop(index) => {
            if let Some(layer) = layers.get_mut(&index) {
                layer.stop();
                if !layer.has_background() {
                    layers.remove(&index);
                    debug!("producer-device: layer {index} stopped and removed");
                }
            }
        }
        DeviceCommand::Clear(index) => {
            if let Some(mut layer) = layers.remove(&index) {
                layer.clear();
            }
        }
        DeviceCommand::ClearAll => {
            layers.clear();
        }
        DeviceCommand::Foreground(index, reply) => {
            let _ = reply.send(layers.get(&index).and_then(Layer::foreground));
        }
        DeviceCommand::Background(index, reply) => {
            let _ = reply.send(layers.get(&index).and_then(Layer::background));
        }
        DeviceCommand::Shutdown => unreachable!("handled by the run loop"),
    }
}

async fn tick(
    layers: &mut BTreeMap<i32, Layer>,
    factory: &Arc<FrameFactory>,
    sink: &mut dyn FrameSink,
) -> Result<()> {
    let receives = layers.values_mut().map(|layer| layer.receive(factory));
    let frames = futures::future::join_all(receives).await;
    sink.send(Frame::Group(frames)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::test_support::{frame_tag, CountingProducer};
    use crate::producer::share;
    use playout_common::VideoFormatDesc;

    struct RecordingSink {
        tx: mpsc::UnboundedSender<Frame>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send(&mut self, frame: Frame) -> Result<()> {
            let _ = self.tx.send(frame);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl FrameSink for FailingSink {
        async fn send(&mut self, _frame: Frame) -> Result<()> {
            Err(Error::Consumer("sink rejected frame".into()))
        }
    }

    fn device() -> (ProducerDevice, mpsc::UnboundedReceiver<Frame>) {
        let factory = FrameFactory::new(VideoFormatDesc::find("pal").unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        (ProducerDevice::new(factory, Box::new(RecordingSink { tx })), rx)
    }

    fn group_len(frame: &Frame) -> usize {
        match frame {
            Frame::Group(children) => children.len(),
            _ => panic!("expected group frame"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_composite_layers_in_index_order() {
        let (device, mut rx) = device();
        device.load(5, share(CountingProducer::new("upper", 100)), true).await.unwrap();
        device.load(1, share(CountingProducer::new("lower", 100)), true).await.unwrap();

        // Skip ticks that ran before both loads applied.
        let frame = loop {
            let frame = rx.recv().await.unwrap();
            if group_len(&frame) == 2 {
                break frame;
            }
        };
        let Frame::Group(children) = frame else { unreachable!() };
        // Both layers contributed; ascending index order is the vec order.
        assert!(frame_tag(&children[0]).is_some());
        assert!(frame_tag(&children[1]).is_some());

        device.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_layer_without_background_is_removed() {
        let (device, mut rx) = device();
        device.load(0, share(CountingProducer::new("a", 100)), true).await.unwrap();
        device.load(1, share(CountingProducer::new("b", 100)), true).await.unwrap();

        while group_len(&rx.recv().await.unwrap()) != 2 {}

        device.stop(1).unwrap();
        // The layer must be gone from the map before the next tick completes.
        let frame = loop {
            let frame = rx.recv().await.unwrap();
            if group_len(&frame) != 2 {
                break frame;
            }
        };
        assert_eq!(group_len(&frame), 1);

        device.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_forgets_every_producer() {
        let (device, mut rx) = device();
        device.load(0, share(CountingProducer::new("a", 100)), true).await.unwrap();

        while group_len(&rx.recv().await.unwrap()) != 1 {}

        device.clear_all().unwrap();
        let frame = loop {
            let frame = rx.recv().await.unwrap();
            if group_len(&frame) == 0 {
                break frame;
            }
        };
        assert_eq!(group_len(&frame), 0);

        device.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_query_resolves_on_executor() {
        let (device, mut rx) = device();
        device.load(7, share(CountingProducer::new("fg", 100)), true).await.unwrap();

        let producer = device.foreground(7).await.unwrap().expect("layer 7 loaded");
        assert_eq!(producer.lock().await.print_name(), "fg");
        assert!(device.foreground(8).await.unwrap().is_none());
        assert!(device.background(7).await.unwrap().is_none());

        let _ = rx.recv().await;
        device.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_sink_clears_layers_but_device_survives() {
        let factory = FrameFactory::new(VideoFormatDesc::find("pal").unwrap());
        let device = ProducerDevice::new(factory, Box::new(FailingSink));
        device.load(0, share(CountingProducer::new("a", 100)), true).await.unwrap();

        // Give the loop a few ticks; it must keep accepting commands.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(device.foreground(0).await.unwrap().is_none());

        device.shutdown().await;
    }
}
