//! Request/reply wire format
//!
//! Requests are JSON objects or a whitespace text form:
//!
//! ```text
//! get enc 0
//! set refs 0.1 0.2 0.3
//! set vmo 1 0.5
//! set pid vel 1 2.0 0 0 10 100 0 1 0 0
//! calp 2 1 0.5 0.5 0
//! ```
//!
//! Replies are always JSON.

use crate::{
    error::{ErrorKind, JointError, Result},
    types::{Pid, PidKind},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outer opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    #[serde(rename = "get")]
    Get,
    #[serde(rename = "set")]
    Set,
    #[serde(rename = "calibrate")]
    Calibrate,
    #[serde(rename = "calp")]
    CalibrateWithParams,
    #[serde(rename = "caldone")]
    CalibrateDone,
    #[serde(rename = "park")]
    Park,
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "help")]
    Help,
}

const OPCODES: [(Opcode, &str); 8] = [
    (Opcode::Get, "get"),
    (Opcode::Set, "set"),
    (Opcode::Calibrate, "calibrate"),
    (Opcode::CalibrateWithParams, "calp"),
    (Opcode::CalibrateDone, "caldone"),
    (Opcode::Park, "park"),
    (Opcode::Stop, "stop"),
    (Opcode::Help, "help"),
];

impl Opcode {
    pub fn token(self) -> &'static str {
        OPCODES.iter().find(|(op, _)| *op == self).map(|(_, t)| *t).unwrap_or("?")
    }

    pub fn parse(token: &str) -> Option<Self> {
        OPCODES.iter().find(|(_, t)| *t == token).map(|(op, _)| *op)
    }

    /// Whether the text form takes a target token after the opcode
    pub fn has_target(self) -> bool {
        matches!(self, Opcode::Get | Opcode::Set)
    }
}

/// Inner opcode: the quantity or interface a GET/SET addresses. Plural
/// forms address the whole group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Ref,
    Refs,
    Rel,
    Rels,
    Don,
    Dons,
    Vel,
    Vels,
    Acc,
    Accs,
    Vmo,
    Vmos,
    Enc,
    Encs,
    Esp,
    Esps,
    Eacc,
    Eaccs,
    EReset,
    EResets,
    Pid,
    Pids,
    Llim,
    Vlim,
    Cmod,
    Cmds,
    Trq,
    Trqs,
    Cur,
    Curs,
    Pwm,
    Pwms,
    Asta,
    Astas,
    Aen,
    Adis,
    Maxc,
    Axes,
    Rvar,
    Lvar,
}

const TARGETS: [(Target, &str); 40] = [
    (Target::Ref, "ref"),
    (Target::Refs, "refs"),
    (Target::Rel, "rel"),
    (Target::Rels, "rels"),
    (Target::Don, "don"),
    (Target::Dons, "dons"),
    (Target::Vel, "vel"),
    (Target::Vels, "vels"),
    (Target::Acc, "acc"),
    (Target::Accs, "accs"),
    (Target::Vmo, "vmo"),
    (Target::Vmos, "vmos"),
    (Target::Enc, "enc"),
    (Target::Encs, "encs"),
    (Target::Esp, "esp"),
    (Target::Esps, "esps"),
    (Target::Eacc, "eacc"),
    (Target::Eaccs, "eaccs"),
    (Target::EReset, "e_reset"),
    (Target::EResets, "e_resets"),
    (Target::Pid, "pid"),
    (Target::Pids, "pids"),
    (Target::Llim, "llim"),
    (Target::Vlim, "vlim"),
    (Target::Cmod, "cmod"),
    (Target::Cmds, "cmds"),
    (Target::Trq, "trq"),
    (Target::Trqs, "trqs"),
    (Target::Cur, "cur"),
    (Target::Curs, "curs"),
    (Target::Pwm, "pwm"),
    (Target::Pwms, "pwms"),
    (Target::Asta, "asta"),
    (Target::Astas, "astas"),
    (Target::Aen, "aen"),
    (Target::Adis, "adis"),
    (Target::Maxc, "maxc"),
    (Target::Axes, "axes"),
    (Target::Rvar, "rvar"),
    (Target::Lvar, "lvar"),
];

impl Target {
    pub fn token(self) -> &'static str {
        TARGETS.iter().find(|(t, _)| *t == self).map(|(_, s)| *s).unwrap_or("?")
    }

    pub fn parse(token: &str) -> Option<Self> {
        TARGETS.iter().find(|(_, s)| *s == token).map(|(t, _)| *t)
    }

    /// Addresses exactly one axis, given right after the target in text form
    pub fn is_single_axis(self) -> bool {
        matches!(
            self,
            Target::Ref
                | Target::Rel
                | Target::Don
                | Target::Vel
                | Target::Acc
                | Target::Vmo
                | Target::Enc
                | Target::Esp
                | Target::Eacc
                | Target::EReset
                | Target::Pid
                | Target::Llim
                | Target::Vlim
                | Target::Cmod
                | Target::Trq
                | Target::Cur
                | Target::Pwm
                | Target::Asta
                | Target::Aen
                | Target::Adis
                | Target::Maxc
        )
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One payload element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
    Pid(Pid),
}

impl Value {
    /// Text-form token: booleans, numbers, otherwise a string
    pub fn from_token(token: &str) -> Self {
        match token {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => match token.parse::<f64>() {
                Ok(number) => Value::Number(number),
                Err(_) => Value::Text(token.to_string()),
            },
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pid(&self) -> Option<&Pid> {
        match self {
            Value::Pid(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Pid(p) => {
                let fields: Vec<String> = p.to_array().iter().map(|v| v.to_string()).collect();
                write!(f, "{}", fields.join(" "))
            }
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Pid> for Value {
    fn from(value: Pid) -> Self {
        Value::Pid(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub op: Opcode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<usize>,
    /// Explicit subset for group targets; all axes when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joints: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_kind: Option<PidKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<Value>,
}

impl Request {
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            target: None,
            axis: None,
            joints: None,
            pid_kind: None,
            payload: Vec::new(),
        }
    }

    pub fn get(target: Target) -> Self {
        Self::new(Opcode::Get).target(target)
    }

    pub fn set(target: Target) -> Self {
        Self::new(Opcode::Set).target(target)
    }

    pub fn target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn axis(mut self, axis: usize) -> Self {
        self.axis = Some(axis);
        self
    }

    pub fn joints(mut self, joints: Vec<usize>) -> Self {
        self.joints = Some(joints);
        self
    }

    pub fn pid_kind(mut self, kind: PidKind) -> Self {
        self.pid_kind = Some(kind);
        self
    }

    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.payload.push(value.into());
        self
    }

    pub fn values<I: IntoIterator<Item = f64>>(mut self, values: I) -> Self {
        self.payload.extend(values.into_iter().map(Value::Number));
        self
    }

    /// JSON object if the line starts with `{`, text form otherwise
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.starts_with('{') {
            serde_json::from_str(line).map_err(|e| JointError::Protocol(format!("malformed request: {}", e)))
        } else {
            Self::parse_text(line)
        }
    }

    pub fn parse_text(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace().peekable();
        let op_token = tokens
            .next()
            .ok_or_else(|| JointError::Protocol("empty request".to_string()))?;
        let op = Opcode::parse(op_token).ok_or_else(|| JointError::Protocol(format!("unknown opcode '{}'", op_token)))?;
        let mut request = Request::new(op);

        let mut axis_required = false;
        let mut axis_optional = false;

        if op.has_target() {
            let token = tokens
                .next()
                .ok_or_else(|| JointError::Protocol(format!("'{}' needs a target", op_token)))?;
            let target = Target::parse(token).ok_or_else(|| JointError::Protocol(format!("unknown target '{}'", token)))?;
            request.target = Some(target);

            if matches!(target, Target::Pid | Target::Pids) {
                if let Some(kind) = tokens.peek().and_then(|t| PidKind::parse(t)) {
                    request.pid_kind = Some(kind);
                    tokens.next();
                }
            }
            axis_required = target.is_single_axis();
        } else {
            match op {
                Opcode::Calibrate | Opcode::CalibrateWithParams | Opcode::CalibrateDone => axis_required = true,
                Opcode::Stop => axis_optional = true,
                _ => {}
            }
        }

        if axis_required || (axis_optional && tokens.peek().is_some()) {
            let token = tokens
                .next()
                .ok_or_else(|| JointError::Protocol(format!("'{}' needs an axis index", line)))?;
            let axis = token
                .parse::<usize>()
                .map_err(|_| JointError::Protocol(format!("invalid axis index '{}'", token)))?;
            request.axis = Some(axis);
        }

        request.payload = tokens.map(Value::from_token).collect();
        Ok(request)
    }

    /// Inverse of [`Request::parse_text`] for requests without a joint subset
    pub fn to_text(&self) -> String {
        let mut parts = vec![self.op.token().to_string()];
        if let Some(target) = self.target {
            parts.push(target.token().to_string());
        }
        if let Some(kind) = self.pid_kind {
            parts.push(format!("{:?}", kind).to_lowercase());
        }
        if let Some(axis) = self.axis {
            parts.push(axis.to_string());
        }
        parts.extend(self.payload.iter().map(|v| v.to_string()));
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Failed,
}

/// Diagnostic attached to failure replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Reply {
    pub fn ok(target: Option<Target>, payload: Vec<Value>) -> Self {
        Self {
            status: Status::Ok,
            target,
            payload,
            error: None,
        }
    }

    pub fn failed(error: &JointError) -> Self {
        Self {
            status: Status::Failed,
            target: None,
            payload: Vec::new(),
            error: Some(ErrorInfo {
                kind: error.kind(),
                message: error.to_string(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn numbers(&self) -> Vec<f64> {
        self.payload.iter().filter_map(Value::as_f64).collect()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"status":"failed"}"#.to_string())
    }
}
