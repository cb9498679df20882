//! Background thread that owns the loaded data and runs the deconvolution.
//!
//! Commands are sent over a `crossbeam_channel`, results come back as events. A running
//! deconvolution is not interrupted by commands: it is cancelled through the shared abort
//! flag and reports its progress through the shared progress lock.

use crate::config::DeconvolutionSettings;
use crate::data_container::{DeconvolutionResult, ScannedImage, Trace};
use crate::error::{DeconvolutionError, Result};
use crate::filters::filter::ProgressLock;
use crate::io::{load_scan, load_trace};
use crate::pipeline::Pipeline;
use crossbeam_channel::{Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone)]
pub enum WorkerCommand {
    LoadReference(PathBuf),
    LoadSample(PathBuf),
    SetReference(Trace),
    SetSample(Box<ScannedImage>),
    UpdateSettings(Box<DeconvolutionSettings>),
    Run,
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    ReferenceLoaded { samples: usize },
    SampleLoaded { width: usize, height: usize, samples: usize },
    Finished(Box<DeconvolutionResult>),
    Failed(String),
}

/// Channels and shared state used to talk to the worker thread.
#[derive(Clone)]
pub struct ThreadCommunication {
    pub command_tx: Sender<WorkerCommand>,
    pub event_rx: Receiver<WorkerEvent>,
    pub progress_lock: ProgressLock,
    pub abort_flag: Arc<AtomicBool>,
}

impl ThreadCommunication {
    pub fn send(&self, command: WorkerCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| DeconvolutionError::Worker {
                message: "the worker thread has stopped".to_string(),
            })
    }

    /// Requests the running deconvolution to stop.
    pub fn abort(&self) {
        self.abort_flag.store(true, Ordering::Relaxed);
    }

    pub fn progress(&self) -> Option<f32> {
        self.progress_lock.read().ok().and_then(|p| *p)
    }
}

pub struct WorkerHandle {
    pub communication: ThreadCommunication,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stops the worker after the current command and waits for it.
    pub fn join(self) -> Result<()> {
        // the worker may already be gone, e.g. after an explicit shutdown
        let _ = self.communication.command_tx.send(WorkerCommand::Shutdown);
        self.handle.join().map_err(|_| DeconvolutionError::Worker {
            message: "the worker thread panicked".to_string(),
        })
    }
}

/// Spawns the worker thread.
pub fn spawn_worker(settings: DeconvolutionSettings) -> Result<WorkerHandle> {
    let (command_tx, command_rx) = crossbeam_channel::unbounded();
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let progress_lock: ProgressLock = Arc::new(RwLock::new(None));
    let abort_flag = Arc::new(AtomicBool::new(false));

    let communication = ThreadCommunication {
        command_tx,
        event_rx,
        progress_lock: progress_lock.clone(),
        abort_flag: abort_flag.clone(),
    };
    let handle = thread::Builder::new()
        .name("deconvolution".to_string())
        .spawn(move || main_thread(command_rx, event_tx, progress_lock, abort_flag, settings))?;
    Ok(WorkerHandle {
        communication,
        handle,
    })
}

fn main_thread(
    command_rx: Receiver<WorkerCommand>,
    event_tx: Sender<WorkerEvent>,
    progress_lock: ProgressLock,
    abort_flag: Arc<AtomicBool>,
    mut settings: DeconvolutionSettings,
) {
    let mut reference: Option<Trace> = None;
    let mut sample: Option<ScannedImage> = None;

    while let Ok(command) = command_rx.recv() {
        let event = match command {
            WorkerCommand::LoadReference(path) => match load_trace(&path) {
                Ok(trace) => {
                    log::info!("loaded reference {path:?} ({} samples)", trace.len());
                    let samples = trace.len();
                    reference = Some(trace);
                    WorkerEvent::ReferenceLoaded { samples }
                }
                Err(err) => {
                    log::error!("failed to load reference {path:?}: {err}");
                    WorkerEvent::Failed(err.to_string())
                }
            },
            WorkerCommand::LoadSample(path) => match load_scan(&path) {
                Ok(scan) => {
                    log::info!(
                        "loaded sample {path:?} ({} x {} pixels)",
                        scan.width,
                        scan.height
                    );
                    let event = sample_loaded(&scan);
                    sample = Some(scan);
                    event
                }
                Err(err) => {
                    log::error!("failed to load sample {path:?}: {err}");
                    WorkerEvent::Failed(err.to_string())
                }
            },
            WorkerCommand::SetReference(trace) => {
                let samples = trace.len();
                reference = Some(trace);
                WorkerEvent::ReferenceLoaded { samples }
            }
            WorkerCommand::SetSample(scan) => {
                let event = sample_loaded(&scan);
                sample = Some(*scan);
                event
            }
            WorkerCommand::UpdateSettings(new_settings) => {
                settings = *new_settings;
                log::debug!("settings updated");
                continue;
            }
            WorkerCommand::Run => {
                abort_flag.store(false, Ordering::Relaxed);
                match (&reference, &sample) {
                    (Some(reference), Some(sample)) => {
                        match run(reference, sample, &settings, &progress_lock, &abort_flag) {
                            Ok(result) => WorkerEvent::Finished(Box::new(result)),
                            Err(err) => {
                                log::error!("deconvolution failed: {err}");
                                WorkerEvent::Failed(err.to_string())
                            }
                        }
                    }
                    (None, _) => WorkerEvent::Failed("no reference loaded".to_string()),
                    (_, None) => WorkerEvent::Failed("no sample loaded".to_string()),
                }
            }
            WorkerCommand::Shutdown => break,
        };
        if event_tx.send(event).is_err() {
            log::warn!("event receiver dropped, stopping the worker");
            break;
        }
    }
    log::debug!("worker thread stopped");
}

fn sample_loaded(scan: &ScannedImage) -> WorkerEvent {
    WorkerEvent::SampleLoaded {
        width: scan.width,
        height: scan.height,
        samples: scan.time.len(),
    }
}

fn run(
    reference: &Trace,
    sample: &ScannedImage,
    settings: &DeconvolutionSettings,
    progress_lock: &ProgressLock,
    abort_flag: &Arc<AtomicBool>,
) -> Result<DeconvolutionResult> {
    let mut pipeline = Pipeline::from_settings(settings)?;
    log::info!("running {}", pipeline.filter_names().join(" -> "));
    pipeline.run(reference, sample, progress_lock, abort_flag)
}
