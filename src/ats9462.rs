use crate::{
    atsapi::{ffi, RetCode},
    ArmParams, BoardError, BoardSession, CaptureConfig, ChannelInfo, DmaBuffer,
};
use libc::{c_long, c_void};
use log::debug;
use std::time::Duration;

fn check(call: &'static str, raw: u32) -> Result<(), BoardError> {
    match RetCode::from(raw) {
        RetCode::Success => Ok(()),
        code => Err(BoardError::Api { call, code, raw }),
    }
}

/// AlazarTech ATS9462 reached through the vendor `ATSApi` library.
pub struct AtsBoard {
    handle: ffi::HANDLE,
    system_id: u32,
    board_id: u32,
}

// The vendor handle may be used from any thread, one call at a time.
unsafe impl Send for AtsBoard {}

impl AtsBoard {
    pub fn open(system_id: u32, board_id: u32) -> Result<Self, BoardError> {
        let handle = unsafe { ffi::AlazarGetBoardBySystemID(system_id, board_id) };
        if handle.is_null() {
            return Err(BoardError::NotFound {
                system_id,
                board_id,
            });
        }
        debug!("opened board {}:{}", system_id, board_id);
        Ok(Self {
            handle,
            system_id,
            board_id,
        })
    }

    pub fn ids(&self) -> (u32, u32) {
        (self.system_id, self.board_id)
    }
}

impl BoardSession for AtsBoard {
    fn apply(&mut self, config: &CaptureConfig) -> Result<(), BoardError> {
        let h = self.handle;
        let clock = &config.clock;
        check("AlazarSetCaptureClock", unsafe {
            ffi::AlazarSetCaptureClock(
                h,
                clock.source.code(),
                clock.rate_code,
                clock.edge.code(),
                clock.decimation,
            )
        })?;
        for ch in &config.channels {
            check("AlazarInputControlEx", unsafe {
                ffi::AlazarInputControlEx(
                    h,
                    ch.channel.code(),
                    ch.coupling.code(),
                    ch.input_range.code(),
                    ch.impedance.code(),
                )
            })?;
            check("AlazarSetBWLimit", unsafe {
                ffi::AlazarSetBWLimit(h, ch.channel.code(), ch.bandwidth_limit as u32)
            })?;
        }
        let [j, k] = &config.trigger.engines;
        check("AlazarSetTriggerOperation", unsafe {
            ffi::AlazarSetTriggerOperation(
                h,
                config.trigger.operation.code(),
                j.engine.code(),
                j.source.code(),
                j.slope.code(),
                j.level,
                k.engine.code(),
                k.source.code(),
                k.slope.code(),
                k.level,
            )
        })?;
        check("AlazarSetExternalTrigger", unsafe {
            ffi::AlazarSetExternalTrigger(
                h,
                config.external_trigger.coupling.code(),
                config.external_trigger.input_range.code(),
            )
        })?;
        check("AlazarSetTriggerDelay", unsafe {
            ffi::AlazarSetTriggerDelay(h, config.trigger_delay)
        })?;
        check("AlazarSetTriggerTimeOut", unsafe {
            ffi::AlazarSetTriggerTimeOut(h, config.trigger_timeout)
        })?;
        check("AlazarConfigureAuxIO", unsafe {
            ffi::AlazarConfigureAuxIO(h, config.aux_io.mode.code(), config.aux_io.parameter)
        })
    }

    fn channel_info(&mut self) -> Result<ChannelInfo, BoardError> {
        let mut memory_samples = 0u32;
        let mut bits_per_sample = 0u8;
        check("AlazarGetChannelInfo", unsafe {
            ffi::AlazarGetChannelInfo(self.handle, &mut memory_samples, &mut bits_per_sample)
        })?;
        Ok(ChannelInfo {
            bits_per_sample,
            memory_samples,
        })
    }

    fn arm(&mut self, params: &ArmParams) -> Result<(), BoardError> {
        check("AlazarSetRecordSize", unsafe {
            ffi::AlazarSetRecordSize(
                self.handle,
                params.pre_trigger_samples,
                params.post_trigger_samples,
            )
        })?;
        check("AlazarBeforeAsyncRead", unsafe {
            ffi::AlazarBeforeAsyncRead(
                self.handle,
                params.channels.mask(),
                -(params.pre_trigger_samples as c_long),
                params.samples_per_record,
                params.records_per_buffer,
                params.records_per_acquisition,
                params.mode_flags,
            )
        })
    }

    fn post_buffer(&mut self, buffer: &mut DmaBuffer) -> Result<(), BoardError> {
        let len = buffer.len() as u32;
        check("AlazarPostAsyncBuffer", unsafe {
            ffi::AlazarPostAsyncBuffer(self.handle, buffer.as_mut_ptr() as *mut c_void, len)
        })
    }

    fn start_capture(&mut self) -> Result<(), BoardError> {
        check("AlazarStartCapture", unsafe {
            ffi::AlazarStartCapture(self.handle)
        })
    }

    fn wait_buffer_ready(
        &mut self,
        buffer: &mut DmaBuffer,
        timeout: Duration,
    ) -> Result<(), BoardError> {
        let timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        let raw = unsafe {
            ffi::AlazarWaitAsyncBufferComplete(
                self.handle,
                buffer.as_mut_ptr() as *mut c_void,
                timeout_ms,
            )
        };
        match RetCode::from(raw) {
            RetCode::WaitTimeout => Err(BoardError::Timeout(timeout)),
            _ => check("AlazarWaitAsyncBufferComplete", raw),
        }
    }

    fn abort(&mut self) -> Result<(), BoardError> {
        check("AlazarAbortAsyncRead", unsafe {
            ffi::AlazarAbortAsyncRead(self.handle)
        })
    }
}
