/// Built-in node executors
///
/// - inputText: start node, forwards the run input
/// - apiCall: one outbound HTTP request, failures folded into the payload
/// - decision / ifElse: branch masks from predicate groups
/// - delay: propagation delay for downstream tasks
/// - notification: renders a message template into the run log

pub mod api_call;
pub mod decision;
pub mod delay;
pub mod input_text;
pub mod notification;

pub use api_call::ApiCallExecutor;
pub use decision::{DecisionExecutor, IfElseExecutor};
pub use delay::DelayExecutor;
pub use input_text::InputTextExecutor;
pub use notification::NotificationExecutor;
