//! Command registry.
//!
//! Every Gearman packet type with its wire code and the ordered names of
//! its NUL-separated arguments. Encode uses the order, decode uses the count.

use std::fmt;

/// Packet type tag carried in bytes 4..8 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandType {
    CanDo = 1,
    CantDo = 2,
    ResetAbilities = 3,
    PreSleep = 4,
    Noop = 6,
    SubmitJob = 7,
    JobCreated = 8,
    GrabJob = 9,
    NoJob = 10,
    JobAssign = 11,
    WorkStatus = 12,
    WorkComplete = 13,
    WorkFail = 14,
    GetStatus = 15,
    EchoReq = 16,
    EchoRes = 17,
    SubmitJobBg = 18,
    Error = 19,
    StatusRes = 20,
    SubmitJobHigh = 21,
    SetClientId = 22,
    CanDoTimeout = 23,
    AllYours = 24,
    WorkException = 25,
    OptionReq = 26,
    OptionRes = 27,
    WorkData = 28,
    WorkWarning = 29,
    GrabJobUniq = 30,
    JobAssignUniq = 31,
    SubmitJobHighBg = 32,
    SubmitJobLow = 33,
    SubmitJobLowBg = 34,
    SubmitJobSched = 35,
    SubmitJobEpoch = 36,
}

const NONE: &[&str] = &[];
const FUNC: &[&str] = &["func_name"];
const HANDLE: &[&str] = &["job_handle"];
const WORKLOAD: &[&str] = &["workload"];
const HANDLE_WORKLOAD: &[&str] = &["job_handle", "workload"];
const SUBMIT: &[&str] = &["func_name", "unique", "workload"];

impl CommandType {
    /// Every known command, in wire-code order.
    pub const ALL: [Self; 35] = [
        Self::CanDo,
        Self::CantDo,
        Self::ResetAbilities,
        Self::PreSleep,
        Self::Noop,
        Self::SubmitJob,
        Self::JobCreated,
        Self::GrabJob,
        Self::NoJob,
        Self::JobAssign,
        Self::WorkStatus,
        Self::WorkComplete,
        Self::WorkFail,
        Self::GetStatus,
        Self::EchoReq,
        Self::EchoRes,
        Self::SubmitJobBg,
        Self::Error,
        Self::StatusRes,
        Self::SubmitJobHigh,
        Self::SetClientId,
        Self::CanDoTimeout,
        Self::AllYours,
        Self::WorkException,
        Self::OptionReq,
        Self::OptionRes,
        Self::WorkData,
        Self::WorkWarning,
        Self::GrabJobUniq,
        Self::JobAssignUniq,
        Self::SubmitJobHighBg,
        Self::SubmitJobLow,
        Self::SubmitJobLowBg,
        Self::SubmitJobSched,
        Self::SubmitJobEpoch,
    ];

    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        let kind = match code {
            1 => Self::CanDo,
            2 => Self::CantDo,
            3 => Self::ResetAbilities,
            4 => Self::PreSleep,
            6 => Self::Noop,
            7 => Self::SubmitJob,
            8 => Self::JobCreated,
            9 => Self::GrabJob,
            10 => Self::NoJob,
            11 => Self::JobAssign,
            12 => Self::WorkStatus,
            13 => Self::WorkComplete,
            14 => Self::WorkFail,
            15 => Self::GetStatus,
            16 => Self::EchoReq,
            17 => Self::EchoRes,
            18 => Self::SubmitJobBg,
            19 => Self::Error,
            20 => Self::StatusRes,
            21 => Self::SubmitJobHigh,
            22 => Self::SetClientId,
            23 => Self::CanDoTimeout,
            24 => Self::AllYours,
            25 => Self::WorkException,
            26 => Self::OptionReq,
            27 => Self::OptionRes,
            28 => Self::WorkData,
            29 => Self::WorkWarning,
            30 => Self::GrabJobUniq,
            31 => Self::JobAssignUniq,
            32 => Self::SubmitJobHighBg,
            33 => Self::SubmitJobLow,
            34 => Self::SubmitJobLowBg,
            35 => Self::SubmitJobSched,
            36 => Self::SubmitJobEpoch,
            _ => return None,
        };
        Some(kind)
    }

    /// Protocol name as it appears in the Gearman documentation.
    pub const fn name(self) -> &'static str {
        match self {
            Self::CanDo => "CAN_DO",
            Self::CantDo => "CANT_DO",
            Self::ResetAbilities => "RESET_ABILITIES",
            Self::PreSleep => "PRE_SLEEP",
            Self::Noop => "NOOP",
            Self::SubmitJob => "SUBMIT_JOB",
            Self::JobCreated => "JOB_CREATED",
            Self::GrabJob => "GRAB_JOB",
            Self::NoJob => "NO_JOB",
            Self::JobAssign => "JOB_ASSIGN",
            Self::WorkStatus => "WORK_STATUS",
            Self::WorkComplete => "WORK_COMPLETE",
            Self::WorkFail => "WORK_FAIL",
            Self::GetStatus => "GET_STATUS",
            Self::EchoReq => "ECHO_REQ",
            Self::EchoRes => "ECHO_RES",
            Self::SubmitJobBg => "SUBMIT_JOB_BG",
            Self::Error => "ERROR",
            Self::StatusRes => "STATUS_RES",
            Self::SubmitJobHigh => "SUBMIT_JOB_HIGH",
            Self::SetClientId => "SET_CLIENT_ID",
            Self::CanDoTimeout => "CAN_DO_TIMEOUT",
            Self::AllYours => "ALL_YOURS",
            Self::WorkException => "WORK_EXCEPTION",
            Self::OptionReq => "OPTION_REQ",
            Self::OptionRes => "OPTION_RES",
            Self::WorkData => "WORK_DATA",
            Self::WorkWarning => "WORK_WARNING",
            Self::GrabJobUniq => "GRAB_JOB_UNIQ",
            Self::JobAssignUniq => "JOB_ASSIGN_UNIQ",
            Self::SubmitJobHighBg => "SUBMIT_JOB_HIGH_BG",
            Self::SubmitJobLow => "SUBMIT_JOB_LOW",
            Self::SubmitJobLowBg => "SUBMIT_JOB_LOW_BG",
            Self::SubmitJobSched => "SUBMIT_JOB_SCHED",
            Self::SubmitJobEpoch => "SUBMIT_JOB_EPOCH",
        }
    }

    /// Ordered argument names for this command.
    pub const fn params(self) -> &'static [&'static str] {
        match self {
            Self::ResetAbilities
            | Self::PreSleep
            | Self::Noop
            | Self::GrabJob
            | Self::NoJob
            | Self::AllYours
            | Self::GrabJobUniq => NONE,
            Self::CanDo | Self::CantDo => FUNC,
            Self::JobCreated | Self::WorkFail | Self::GetStatus => HANDLE,
            Self::EchoReq | Self::EchoRes => WORKLOAD,
            Self::WorkComplete | Self::WorkException | Self::WorkData | Self::WorkWarning => {
                HANDLE_WORKLOAD
            }
            Self::SubmitJob
            | Self::SubmitJobBg
            | Self::SubmitJobHigh
            | Self::SubmitJobHighBg
            | Self::SubmitJobLow
            | Self::SubmitJobLowBg => SUBMIT,
            Self::JobAssign => &["job_handle", "func_name", "workload"],
            Self::JobAssignUniq => &["job_handle", "func_name", "unique", "workload"],
            Self::WorkStatus => &["job_handle", "numerator", "denominator"],
            Self::Error => &["error_code", "error_text"],
            Self::StatusRes => &["job_handle", "known", "running", "numerator", "denominator"],
            Self::SetClientId => &["client_id"],
            Self::CanDoTimeout => &["func_name", "timeout"],
            Self::OptionReq | Self::OptionRes => &["option_name"],
            Self::SubmitJobSched => &[
                "func_name",
                "unique",
                "minute",
                "hour",
                "day_of_month",
                "month",
                "day_of_week",
                "workload",
            ],
            Self::SubmitJobEpoch => &["func_name", "unique", "epoch", "workload"],
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for kind in CommandType::ALL {
            assert_eq!(CommandType::from_code(kind.code()), Some(kind));
        }
    }

    #[test]
    fn all_is_sorted_and_complete() {
        let codes: Vec<u32> = CommandType::ALL.iter().map(|k| k.code()).collect();
        let expected: Vec<u32> = (1..=36).filter(|c| *c != 5).collect();
        assert_eq!(codes, expected);
    }

    #[test]
    fn unknown_codes() {
        assert_eq!(CommandType::from_code(0), None);
        assert_eq!(CommandType::from_code(5), None);
        assert_eq!(CommandType::from_code(37), None);
    }

    #[test]
    fn params_for_core_commands() {
        assert_eq!(CommandType::GrabJob.params(), &[] as &[&str]);
        assert_eq!(
            CommandType::JobAssign.params(),
            &["job_handle", "func_name", "workload"]
        );
        assert_eq!(CommandType::SubmitJobLowBg.params(), SUBMIT);
        assert_eq!(CommandType::StatusRes.params().len(), 5);
    }

    #[test]
    fn workload_is_always_last() {
        for kind in CommandType::ALL {
            let params = kind.params();
            if let Some(pos) = params.iter().position(|p| *p == "workload") {
                assert_eq!(pos, params.len() - 1, "{kind}");
            }
        }
    }

    #[test]
    fn display_uses_protocol_name() {
        assert_eq!(CommandType::SubmitJobHighBg.to_string(), "SUBMIT_JOB_HIGH_BG");
    }
}
