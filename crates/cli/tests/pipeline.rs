//! End-to-end pipeline tests: filesystem event -> debounce -> dispatch
//! -> converter, using real directories and a recording converter.

use async_trait::async_trait;
use cli_lib::config::Config;
use cli_lib::service::Service;
use convert::{ConvertError, Converter, ProgressFn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

#[derive(Default)]
struct RecordingConverter {
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    fail: bool,
}

impl RecordingConverter {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Converter for RecordingConverter {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        progress: &ProgressFn,
    ) -> Result<(), ConvertError> {
        self.calls
            .lock()
            .unwrap()
            .push((input.to_path_buf(), output.to_path_buf()));
        if self.fail {
            return Err(ConvertError::Failed {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
                reason: "synthetic failure".into(),
            });
        }
        progress(1000);
        std::fs::write(output, b"converted").map_err(|e| ConvertError::Io {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

struct Pipeline {
    input: TempDir,
    output: TempDir,
    converter: Arc<RecordingConverter>,
    service: Service,
    shutdown_tx: broadcast::Sender<()>,
    dispatcher: tokio::task::JoinHandle<()>,
}

impl Pipeline {
    fn start(converter: RecordingConverter, quiet_time_ms: u64) -> Self {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let config = Config {
            input_dir: input.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            quiet_time_ms,
            extensions: vec!["txt".into()],
            ..Config::default()
        };

        let converter = Arc::new(converter);
        let service = Service::new(config, Arc::clone(&converter) as Arc<dyn Converter>);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let dispatcher = service.start(shutdown_rx).unwrap();

        Self {
            input,
            output,
            converter,
            service,
            shutdown_tx,
            dispatcher,
        }
    }

    async fn shut_down(self) {
        let _ = self.shutdown_tx.send(());
        self.service.stop();
        let _ = self.dispatcher.await;
    }
}

async fn wait_for(cond: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_file_is_converted_exactly_once() {
    let pipeline = Pipeline::start(RecordingConverter::default(), 200);

    std::fs::write(pipeline.input.path().join("song.txt"), b"payload").unwrap();

    let converter = Arc::clone(&pipeline.converter);
    assert!(wait_for(move || !converter.calls().is_empty()).await);

    // Leave room for an erroneous duplicate release to surface.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let calls = pipeline.converter.calls();
    assert_eq!(calls.len(), 1, "expected exactly one conversion: {calls:?}");

    let (source, destination) = &calls[0];
    assert!(source.ends_with("song.txt"));
    assert_eq!(
        destination,
        &pipeline.output.path().join("song.txt.mp3")
    );
    assert!(destination.exists());

    pipeline.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rewrites_during_the_quiet_period_coalesce() {
    let pipeline = Pipeline::start(RecordingConverter::default(), 400);

    let file = pipeline.input.path().join("growing.txt");
    std::fs::write(&file, b"chunk one").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    std::fs::write(&file, b"chunk one, chunk two").unwrap();

    let converter = Arc::clone(&pipeline.converter);
    assert!(wait_for(move || !converter.calls().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(800)).await;

    let calls = pipeline.converter.calls();
    assert_eq!(
        calls.len(),
        1,
        "writes inside one quiet window must coalesce: {calls:?}"
    );

    pipeline.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn existing_destination_is_skipped() {
    let pipeline = Pipeline::start(RecordingConverter::default(), 200);

    std::fs::write(
        pipeline.output.path().join("song.txt.mp3"),
        b"already there",
    )
    .unwrap();
    std::fs::write(pipeline.input.path().join("song.txt"), b"payload").unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(
        pipeline.converter.calls().is_empty(),
        "existing destination must not be overwritten"
    );

    pipeline.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unwatched_extensions_are_ignored() {
    let pipeline = Pipeline::start(RecordingConverter::default(), 200);

    std::fs::write(pipeline.input.path().join("cover.jpg"), b"not audio").unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(pipeline.converter.calls().is_empty());
    assert!(pipeline.service.scheduler().is_empty());

    pipeline.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_conversion_does_not_stop_the_dispatcher() {
    let pipeline = Pipeline::start(RecordingConverter::failing(), 200);

    std::fs::write(pipeline.input.path().join("first.txt"), b"a").unwrap();
    let converter = Arc::clone(&pipeline.converter);
    assert!(wait_for(move || converter.calls().len() == 1).await);

    std::fs::write(pipeline.input.path().join("second.txt"), b"b").unwrap();
    let converter = Arc::clone(&pipeline.converter);
    assert!(
        wait_for(move || converter.calls().len() == 2).await,
        "dispatcher must survive a failing conversion"
    );

    let calls = pipeline.converter.calls();
    assert!(calls[0].0.ends_with("first.txt"));
    assert!(calls[1].0.ends_with("second.txt"));

    pipeline.shut_down().await;
}
