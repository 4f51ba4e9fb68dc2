//! Off-schedule sample reduction. The message shapes below are the wire
//! protocol, so their JSON form must stay stable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use super::reducer::{SampleReducer, WaveformRequest};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WorkerRequest {
    AddSamples {
        samples: Vec<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_samples: Option<Vec<f32>>,
    },
    BuildWaveform {
        canvas_width: u32,
        canvas_height: u32,
        #[serde(rename = "removeDC")]
        remove_dc: bool,
        alpha: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_sample: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_sample: Option<u64>,
    },
    Reset,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WorkerResponse {
    WaveformReady {
        mins: Vec<f32>,
        maxs: Vec<f32>,
        total_samples: u64,
    },
    ResetComplete,
}

impl WorkerRequest {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to encode worker request")
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to decode worker request")
    }
}

impl WorkerResponse {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to encode worker response")
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to decode worker response")
    }
}

/// Apply one request to a reducer, producing the reply if the request has one.
pub fn handle_request(reducer: &mut SampleReducer, request: WorkerRequest) -> Option<WorkerResponse> {
    match request {
        WorkerRequest::AddSamples {
            samples,
            raw_samples,
        } => {
            reducer.add_samples(&samples, raw_samples.as_deref());
            None
        }
        WorkerRequest::BuildWaveform {
            canvas_width,
            canvas_height,
            remove_dc,
            alpha,
            start_sample,
            end_sample,
        } => {
            let envelope = reducer.build(&WaveformRequest {
                canvas_width,
                canvas_height,
                remove_dc,
                alpha,
                start_sample,
                end_sample,
            });
            Some(WorkerResponse::WaveformReady {
                mins: envelope.mins,
                maxs: envelope.maxs,
                total_samples: envelope.total_samples,
            })
        }
        WorkerRequest::Reset => {
            reducer.reset();
            Some(WorkerResponse::ResetComplete)
        }
    }
}

/// A dedicated reduction thread fed over a channel.
pub struct ReducerWorker {
    requests: Option<Sender<WorkerRequest>>,
    responses: Receiver<WorkerResponse>,
    handle: Option<JoinHandle<()>>,
}

impl ReducerWorker {
    pub fn spawn(expected_total: Option<u64>) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<WorkerRequest>();
        let (response_tx, response_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("sample-reducer".into())
            .spawn(move || run(request_rx, response_tx, expected_total))
            .context("Failed to spawn sample reducer thread")?;

        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            handle: Some(handle),
        })
    }

    /// Returns false once the worker has gone away.
    pub fn send(&self, request: WorkerRequest) -> bool {
        self.requests
            .as_ref()
            .is_some_and(|tx| tx.send(request).is_ok())
    }

    pub fn try_recv(&self) -> Option<WorkerResponse> {
        self.responses.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerResponse> {
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Some(response),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("Sample reducer thread disconnected");
                None
            }
        }
    }
}

impl Drop for ReducerWorker {
    fn drop(&mut self) {
        drop(self.requests.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Sample reducer thread panicked");
            }
        }
    }
}

fn run(requests: Receiver<WorkerRequest>, responses: Sender<WorkerResponse>, expected_total: Option<u64>) {
    let mut reducer = SampleReducer::new(expected_total);
    while let Ok(first) = requests.recv() {
        let mut batch: Vec<WorkerRequest> = std::iter::once(first).chain(requests.try_iter()).collect();
        // Consecutive builds collapse into the latest one.
        batch.dedup_by(|next, prev| {
            matches!(prev, WorkerRequest::BuildWaveform { .. })
                && matches!(next, WorkerRequest::BuildWaveform { .. })
                && {
                    std::mem::swap(prev, next);
                    true
                }
        });
        for request in batch {
            if let Some(response) = handle_request(&mut reducer, request) {
                if responses.send(response).is_err() {
                    return;
                }
            }
        }
    }
    log::debug!("Sample reducer thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_protocol() {
        let build = WorkerRequest::BuildWaveform {
            canvas_width: 800,
            canvas_height: 120,
            remove_dc: true,
            alpha: 0.5,
            start_sample: Some(10),
            end_sample: None,
        };
        let json: serde_json::Value = serde_json::from_str(&build.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "build-waveform");
        assert_eq!(json["canvasWidth"], 800);
        assert_eq!(json["canvasHeight"], 120);
        assert_eq!(json["removeDC"], true);
        assert_eq!(json["startSample"], 10);
        assert!(json.get("endSample").is_none());

        let add = WorkerRequest::from_json(r#"{"type":"add-samples","samples":[0.5],"rawSamples":[1.5]}"#).unwrap();
        assert_eq!(
            add,
            WorkerRequest::AddSamples {
                samples: vec![0.5],
                raw_samples: Some(vec![1.5]),
            }
        );

        let ready = WorkerResponse::WaveformReady {
            mins: vec![-1.0],
            maxs: vec![1.0],
            total_samples: 3,
        };
        let json: serde_json::Value = serde_json::from_str(&ready.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "waveform-ready");
        assert_eq!(json["totalSamples"], 3);

        assert_eq!(WorkerRequest::Reset.to_json().unwrap(), r#"{"type":"reset"}"#);
        assert_eq!(WorkerResponse::ResetComplete.to_json().unwrap(), r#"{"type":"reset-complete"}"#);
    }

    #[test]
    fn worker_reduces_and_resets() {
        let worker = ReducerWorker::spawn(None).unwrap();
        assert!(worker.send(WorkerRequest::AddSamples {
            samples: vec![0.0, 1.0, -1.0, 0.5],
            raw_samples: None,
        }));
        assert!(worker.send(WorkerRequest::BuildWaveform {
            canvas_width: 2,
            canvas_height: 50,
            remove_dc: false,
            alpha: 0.1,
            start_sample: None,
            end_sample: None,
        }));

        let response = worker.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            response,
            WorkerResponse::WaveformReady {
                mins: vec![0.0, -1.0],
                maxs: vec![1.0, 0.5],
                total_samples: 4,
            }
        );

        assert!(worker.send(WorkerRequest::Reset));
        assert_eq!(
            worker.recv_timeout(Duration::from_secs(5)),
            Some(WorkerResponse::ResetComplete)
        );
    }
}
