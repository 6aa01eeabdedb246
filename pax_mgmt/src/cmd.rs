// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The command engine.
//!
//! Every chip capability funnels through [`Switch::command`]: the op-code
//! is routed to the handle's target fabric node, classified against the
//! static no-retry table, submitted, and collected. A transient
//! desynchronization (a stale response left by an interrupted client) is
//! healed by draining one response and resending exactly once, but never
//! for a command whose re-execution could repeat an irreversible side
//! effect; those surface the condition to the caller instead.

use crate::Switch;
use crate::error::Error;
use crate::error::Result;
use crate::error::SwitchError;
use pax_proto::mrpc::CommandId;
use pax_proto::mrpc::RetrySafety;
use pax_proto::mrpc::command_word;
use pax_proto::mrpc::retry_safety;
use pax_transport::TransportError;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

impl Switch {
    /// Executes one MRPC command: sends `input`, fills `output` from the
    /// response.
    ///
    /// A chip-reported error code comes back as [`Error::Switch`]; a
    /// transport failure as [`Error::Transport`].
    pub fn command(
        &mut self,
        cmd: CommandId,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<()> {
        let word = command_word(cmd.base(), self.pax_id);
        let safety = retry_safety(cmd, input.first().copied());
        tracing::debug!(
            op = cmd.name(),
            code = cmd.base().0,
            pax = self.pax_id,
            input_len = input.len(),
            "command"
        );

        match self.backend.submit(word, input, output.len(), safety) {
            Ok(()) => {}
            Err(TransportError::Desynchronized) => {
                if safety == RetrySafety::NoRetry {
                    // Resending could execute the side effect twice; the
                    // caller decides.
                    return Err(Error::transport(cmd, TransportError::Desynchronized));
                }
                tracing::warn!(
                    op = cmd.name(),
                    "stale response pending, draining and resending once"
                );
                let _ = self.backend.collect(&mut []);
                self.backend
                    .submit(word, input, output.len(), safety)
                    .map_err(|err| Error::transport(cmd, err))?;
            }
            Err(err) => return Err(Error::transport(cmd, err)),
        }

        let ret = self
            .backend
            .collect(output)
            .map_err(|err| Error::transport(cmd, err))?;
        if ret != 0 {
            let err = SwitchError {
                op: cmd.base(),
                code: ret,
            };
            tracing::debug!(op = cmd.name(), code = ret, "chip reported an error");
            return Err(err.into());
        }
        Ok(())
    }

    /// Runs a command whose response is the wire struct `O`.
    pub(crate) fn command_reply<O>(&mut self, cmd: CommandId, input: &[u8]) -> Result<O>
    where
        O: FromBytes + FromZeros + IntoBytes + Immutable + KnownLayout,
    {
        let mut reply = O::new_zeroed();
        self.command(cmd, input, reply.as_mut_bytes())?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use crate::Switch;
    use crate::error::Error;
    use pax_proto::mrpc::CommandId;
    use pax_transport::TransportError;
    use pax_transport::sim::SimSwitch;

    fn open_sim() -> (Switch, pax_transport::sim::SimControl) {
        let (sim, ctl) = SimSwitch::new();
        let dev = Switch::from_backend(Box::new(sim), "sim").unwrap();
        (dev, ctl)
    }

    #[test]
    fn retry_safe_command_resends_exactly_once_on_desync() {
        let (mut dev, ctl) = open_sim();
        ctl.inject_desync();

        let mut out = [0u8; 4];
        dev.command(CommandId::ECHO, &0xdead_beefu32.to_le_bytes(), &mut out)
            .unwrap();
        assert_eq!(u32::from_le_bytes(out), !0xdead_beefu32);
        // Two submissions: the faulted one and the single resend.
        assert_eq!(ctl.submit_count(CommandId::ECHO), 2);
    }

    #[test]
    fn no_retry_command_surfaces_desync_without_second_send() {
        let (mut dev, ctl) = open_sim();
        ctl.inject_desync();

        let err = dev
            .command(CommandId::SECURE_STATE_SET, &[1, 0, 0, 0], &mut [])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                source: TransportError::Desynchronized,
                ..
            }
        ));
        assert_eq!(ctl.submit_count(CommandId::SECURE_STATE_SET), 1);
    }

    #[test]
    fn chip_error_codes_decode() {
        let (mut dev, _ctl) = open_sim();
        let err = dev.command(CommandId(0x7f7f), &[], &mut []).unwrap_err();
        let Error::Switch(err) = err else {
            panic!("expected a chip error, got {err:?}");
        };
        assert_eq!(err.code, 0x64005);
        assert_eq!(err.description(), "invalid command");
    }

    #[test]
    fn routing_target_is_carried_in_the_command_word() {
        let (mut dev, ctl) = open_sim();
        ctl.set_local_pax(1);
        dev.set_pax_id(3).unwrap();

        let mut out = [0u8; 4];
        dev.command(CommandId::ECHO, &[0; 4], &mut out).unwrap();
        assert_eq!(ctl.last_routed_pax(), Some(3));
    }
}
