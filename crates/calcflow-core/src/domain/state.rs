//! State - ビュープロセスの状態

use serde::{Deserialize, Serialize};

/// ViewProcessState はビュープロセスの状態を表現
///
/// # 状態遷移
/// - running → terminated（不可逆）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewProcessState {
    Running,
    Terminated,
}

impl ViewProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}
