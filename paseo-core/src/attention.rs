//! C9: attention/notification policy (spec.md §4.9). Pure functions of
//! `(reason, clientStates)`, following the same
//! `safety::assess_command_safety`/`assess_patch_safety` shape of a pure
//! decision function, generalized from command-safety verdicts to
//! notification verdicts.

use paseo_protocol::AgentId;
use paseo_protocol::agent::AttentionReason;
use paseo_protocol::session::ClientState;
use paseo_protocol::session::DeviceType;

/// Whether client `subject` should receive an in-app notification for
/// `reason` on `agent`, given the full set of connected client states.
pub fn should_notify_client(
    agent: AgentId,
    reason: AttentionReason,
    subject: &ClientState,
    all_clients: &[ClientState],
) -> bool {
    let any_focused_visible = all_clients
        .iter()
        .any(|c| c.is_focused_on(agent) && c.app_visible);
    if any_focused_visible {
        return false;
    }

    match subject.device_type {
        None => true,
        Some(_) if subject.is_stale => {
            let active_web = all_clients
                .iter()
                .any(|c| c.device_type == Some(DeviceType::Web) && !c.is_stale);
            let any_mobile_or_unidentified = all_clients
                .iter()
                .any(|c| matches!(c.device_type, None | Some(DeviceType::Mobile)));
            match subject.device_type {
                Some(DeviceType::Mobile) => !active_web,
                Some(DeviceType::Web) => !any_mobile_or_unidentified,
                _ => true,
            }
        }
        Some(_) => {
            // Visible-active client not focused on any agent: suppressed.
            // (If it were focused on `agent`, the early return above would
            // already have fired; so "not focused on any agent" here means
            // either unfocused or focused elsewhere — both suppressed when
            // app_visible, both notified when backgrounded.)
            !subject.app_visible
        }
    }
}

/// Whether a push notification should be sent for `reason` given the full
/// set of connected client states.
pub fn should_send_push(reason: AttentionReason, all_clients: &[ClientState]) -> bool {
    if reason == AttentionReason::Error {
        return false;
    }
    let visible_web = all_clients
        .iter()
        .any(|c| c.device_type == Some(DeviceType::Web) && c.app_visible);
    let visible_mobile = all_clients
        .iter()
        .any(|c| c.device_type == Some(DeviceType::Mobile) && c.app_visible);
    !(visible_web || visible_mobile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(device: Option<DeviceType>, visible: bool, stale: bool, focused: Option<AgentId>) -> ClientState {
        ClientState {
            client_id: "c".into(),
            device_type: device,
            app_visible: visible,
            is_stale: stale,
            focused_agent_id: focused,
        }
    }

    /// Scenario 5 in spec.md §8.
    #[test]
    fn suppressed_when_client_focused_and_visible() {
        let agent = AgentId::new();
        let subject = client(Some(DeviceType::Web), true, false, Some(agent));
        let all = vec![subject.clone()];
        assert!(!should_notify_client(
            agent,
            AttentionReason::Finished,
            &subject,
            &all
        ));
    }

    #[test]
    fn unidentified_clients_are_notified_by_default() {
        let agent = AgentId::new();
        let subject = client(None, true, false, None);
        let all = vec![subject.clone()];
        assert!(should_notify_client(
            agent,
            AttentionReason::Finished,
            &subject,
            &all
        ));
    }

    #[test]
    fn visible_unfocused_client_is_suppressed() {
        let agent = AgentId::new();
        let subject = client(Some(DeviceType::Web), true, false, None);
        let all = vec![subject.clone()];
        assert!(!should_notify_client(
            agent,
            AttentionReason::Finished,
            &subject,
            &all
        ));
    }

    #[test]
    fn stale_mobile_suppressed_in_presence_of_active_web() {
        let agent = AgentId::new();
        let stale_mobile = client(Some(DeviceType::Mobile), false, true, None);
        let active_web = client(Some(DeviceType::Web), false, false, None);
        let all = vec![stale_mobile.clone(), active_web];
        assert!(!should_notify_client(
            agent,
            AttentionReason::Finished,
            &stale_mobile,
            &all
        ));
    }

    #[test]
    fn push_never_sent_for_error_reason() {
        assert!(!should_send_push(AttentionReason::Error, &[]));
    }

    #[test]
    fn push_suppressed_with_visible_web_client() {
        let visible_web = client(Some(DeviceType::Web), true, false, None);
        assert!(!should_send_push(
            AttentionReason::Finished,
            &[visible_web]
        ));
    }

    #[test]
    fn push_sent_with_no_visible_clients() {
        let backgrounded = client(Some(DeviceType::Web), false, false, None);
        assert!(should_send_push(AttentionReason::Finished, &[backgrounded]));
    }
}
