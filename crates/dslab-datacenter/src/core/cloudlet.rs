//! Cloudlets, the units of work executed by guests.

use serde::Serialize;

use crate::core::utilization_model::{FullUtilizationModel, UtilizationModel};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CloudletStatus {
    Created,
    Queued,
    InExec,
    Success,
    Failed,
}

impl CloudletStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CloudletStatus::Success | CloudletStatus::Failed)
    }
}

/// A step of the cloudlet workflow.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Stage {
    /// Executes `length` instructions (in millions).
    Compute { length: f64 },
    /// Sends `data` bytes to cloudlet `peer`.
    Send { peer: u32, data: u64 },
    /// Waits for a packet from cloudlet `peer`.
    Recv { peer: u32 },
}

#[derive(Clone)]
pub struct Cloudlet {
    pub id: u32,
    pub pes: u32,
    stages: Vec<Stage>,
    current_stage: usize,
    remaining_length: f64,
    status: CloudletStatus,
    submission_time: Option<f64>,
    exec_start_time: Option<f64>,
    exec_finish_time: Option<f64>,
    guest_id: Option<u32>,
    host_id: Option<u32>,
    utilization_model: Box<dyn UtilizationModel>,
}

impl Cloudlet {
    pub fn new(id: u32, pes: u32) -> Self {
        Self {
            id,
            pes,
            stages: Vec::new(),
            current_stage: 0,
            remaining_length: 0.,
            status: CloudletStatus::Created,
            submission_time: None,
            exec_start_time: None,
            exec_finish_time: None,
            guest_id: None,
            host_id: None,
            utilization_model: Box::new(FullUtilizationModel::new()),
        }
    }

    pub fn with_utilization_model(mut self, model: Box<dyn UtilizationModel>) -> Self {
        self.utilization_model = model;
        self
    }

    pub fn add_execution_stage(mut self, length: f64) -> Self {
        self.push_stage(Stage::Compute { length });
        self
    }

    pub fn add_send_stage(mut self, peer: u32, data: u64) -> Self {
        self.push_stage(Stage::Send { peer, data });
        self
    }

    pub fn add_recv_stage(mut self, peer: u32) -> Self {
        self.push_stage(Stage::Recv { peer });
        self
    }

    fn push_stage(&mut self, stage: Stage) {
        if self.stages.is_empty() {
            if let Stage::Compute { length } = stage {
                self.remaining_length = length;
            }
        }
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns the stage the cloudlet is currently at, or `None` when all stages are done.
    pub fn current_stage(&self) -> Option<&Stage> {
        self.stages.get(self.current_stage)
    }

    pub fn current_stage_index(&self) -> usize {
        self.current_stage
    }

    /// Total instruction length of all compute stages.
    pub fn length(&self) -> f64 {
        self.stages
            .iter()
            .map(|s| match s {
                Stage::Compute { length } => *length,
                _ => 0.,
            })
            .sum()
    }

    /// Instructions left in the current compute stage.
    pub fn remaining_length(&self) -> f64 {
        self.remaining_length
    }

    pub fn is_computing(&self) -> bool {
        self.status == CloudletStatus::InExec && matches!(self.current_stage(), Some(Stage::Compute { .. }))
    }

    pub fn status(&self) -> CloudletStatus {
        self.status
    }

    pub fn guest_id(&self) -> Option<u32> {
        self.guest_id
    }

    pub fn host_id(&self) -> Option<u32> {
        self.host_id
    }

    pub fn submission_time(&self) -> Option<f64> {
        self.submission_time
    }

    pub fn exec_start_time(&self) -> Option<f64> {
        self.exec_start_time
    }

    pub fn exec_finish_time(&self) -> Option<f64> {
        self.exec_finish_time
    }

    pub fn utilization(&self, time: f64) -> f64 {
        self.utilization_model.get_utilization(time)
    }

    pub(crate) fn set_host(&mut self, host_id: u32) {
        self.host_id = Some(host_id);
    }

    pub(crate) fn submit(&mut self, guest_id: u32, time: f64) {
        self.guest_id = Some(guest_id);
        self.submission_time = Some(time);
        self.status = CloudletStatus::Queued;
    }

    pub(crate) fn start(&mut self, time: f64) {
        if self.status == CloudletStatus::Queued || self.status == CloudletStatus::Created {
            self.status = CloudletStatus::InExec;
            self.exec_start_time = Some(time);
            if self.stages.is_empty() {
                self.status = CloudletStatus::Success;
                self.exec_finish_time = Some(time);
            }
        }
    }

    /// Consumes up to `instructions` of the current compute stage. Returns true if the stage is done.
    pub(crate) fn consume(&mut self, instructions: f64) -> bool {
        self.remaining_length -= instructions;
        self.remaining_length <= 1e-9 * self.length().max(1.)
    }

    /// Moves to the next stage, finishing the cloudlet after the last one.
    pub(crate) fn next_stage(&mut self, time: f64) {
        self.current_stage += 1;
        match self.stages.get(self.current_stage) {
            Some(Stage::Compute { length }) => self.remaining_length = *length,
            Some(_) => self.remaining_length = 0.,
            None => {
                self.remaining_length = 0.;
                self.status = CloudletStatus::Success;
                self.exec_finish_time = Some(time);
            }
        }
    }

    pub(crate) fn fail(&mut self, time: f64) {
        if !self.status.is_terminal() {
            self.status = CloudletStatus::Failed;
            self.exec_finish_time = Some(time);
        }
    }

    pub fn record(&self) -> CloudletRecord {
        CloudletRecord {
            id: self.id,
            status: self.status,
            host_id: self.host_id,
            guest_id: self.guest_id,
            exec_start: self.exec_start_time,
            exec_finish: self.exec_finish_time,
        }
    }
}

/// Summary of cloudlet execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CloudletRecord {
    pub id: u32,
    pub status: CloudletStatus,
    pub host_id: Option<u32>,
    pub guest_id: Option<u32>,
    pub exec_start: Option<f64>,
    pub exec_finish: Option<f64>,
}

impl CloudletRecord {
    pub fn duration(&self) -> Option<f64> {
        Some(self.exec_finish? - self.exec_start?)
    }
}
