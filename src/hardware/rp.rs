//! FFI adapter to the vendor board driver.
//!
//! Each trait call maps onto exactly one driver entry point and converts the
//! returned status code into [`HalError`]. Constants below mirror the vendor
//! header; the generator and acquisition units are only ever used on their
//! first channel pair, so the channel arguments are fixed here.

use std::os::raw::{c_float, c_int, c_uint};

use super::design_parameters::HW_RING;
use super::{
    DaqBoard, HalError, InputChannel, PinDirection, PinState, TriggerSource, TriggerState,
};

const RP_OK: c_int = 0;

// rp_channel_t
const RP_CH_1: c_uint = 0;
const RP_CH_2: c_uint = 1;

// rp_waveform_t
const RP_WAVEFORM_ARBITRARY: c_uint = 7;

// rp_acq_trig_src_t
const RP_TRIG_SRC_NOW: c_uint = 1;
const RP_TRIG_SRC_EXT_PE: c_uint = 6;

// rp_acq_trig_state_t
const RP_TRIG_STATE_TRIGGERED: c_uint = 0;

// rp_dpin_t: pins 0..=7 are the LEDs, the P-header DIO lines follow.
const RP_DIO0_P: c_uint = 8;

// rp_pinDirection_t
const RP_IN: c_uint = 0;
const RP_OUT: c_uint = 1;

extern "C" {
    fn rp_Init() -> c_int;
    fn rp_Release() -> c_int;

    fn rp_GenReset() -> c_int;
    fn rp_GenArbWaveform(channel: c_uint, waveform: *const c_float, length: u32) -> c_int;
    fn rp_GenWaveform(channel: c_uint, waveform: c_uint) -> c_int;
    fn rp_GenFreq(channel: c_uint, frequency: c_float) -> c_int;
    fn rp_GenAmp(channel: c_uint, amplitude: c_float) -> c_int;
    fn rp_GenPhase(channel: c_uint, phase: c_float) -> c_int;
    fn rp_GenOutEnable(channel: c_uint) -> c_int;
    fn rp_GenOutDisable(channel: c_uint) -> c_int;

    fn rp_AcqReset() -> c_int;
    fn rp_AcqSetDecimation(decimation: c_uint) -> c_int;
    fn rp_AcqSetTriggerDelay(delay: i32) -> c_int;
    fn rp_AcqSetTriggerSrc(source: c_uint) -> c_int;
    fn rp_AcqStart() -> c_int;
    fn rp_AcqStop() -> c_int;
    fn rp_AcqGetWritePointer(pos: *mut u32) -> c_int;
    fn rp_AcqGetTriggerState(state: *mut c_uint) -> c_int;
    fn rp_AcqGetDataRaw(channel: c_uint, pos: u32, size: *mut u32, buffer: *mut i16) -> c_int;

    fn rp_DpinSetDirection(pin: c_uint, direction: c_uint) -> c_int;
    fn rp_DpinSetState(pin: c_uint, state: c_uint) -> c_int;

    fn rp_AOpinSetValue(pin: c_uint, value: c_float) -> c_int;
}

fn check(call: &'static str, code: c_int) -> Result<(), HalError> {
    if code == RP_OK {
        Ok(())
    } else {
        Err(HalError::Driver { call, code })
    }
}

/// rp_acq_decimation_t is an enumeration, not the decimation factor itself.
fn decimation_code(decimation: u32) -> Result<c_uint, HalError> {
    match decimation {
        1 => Ok(0),
        8 => Ok(1),
        64 => Ok(2),
        1024 => Ok(3),
        8192 => Ok(4),
        65536 => Ok(5),
        _ => Err(HalError::Driver {
            call: "rp_AcqSetDecimation",
            code: -1,
        }),
    }
}

/// The physical board, initialised through the vendor driver.
pub struct VendorBoard(());

impl VendorBoard {
    /// Bring the driver up. Fails when the FPGA image or the memory-mapped
    /// register window is unavailable, which is fatal to the process.
    pub fn init() -> Result<Self, HalError> {
        // Note(unsafe): all driver entry points are plain C calls with no
        // retained pointers; the driver serialises hardware access itself.
        check("rp_Init", unsafe { rp_Init() })?;
        Ok(VendorBoard(()))
    }
}

impl Drop for VendorBoard {
    fn drop(&mut self) {
        let _ = unsafe { rp_Release() };
    }
}

impl DaqBoard for VendorBoard {
    fn gen_reset(&self) -> Result<(), HalError> {
        check("rp_GenReset", unsafe { rp_GenReset() })
    }

    fn gen_set_waveform(&self, samples: &[f32]) -> Result<(), HalError> {
        check("rp_GenWaveform", unsafe {
            rp_GenWaveform(RP_CH_1, RP_WAVEFORM_ARBITRARY)
        })?;
        check("rp_GenArbWaveform", unsafe {
            rp_GenArbWaveform(RP_CH_1, samples.as_ptr(), samples.len() as u32)
        })
    }

    fn gen_set_freq(&self, hz: f64) -> Result<(), HalError> {
        check("rp_GenFreq", unsafe { rp_GenFreq(RP_CH_1, hz as c_float) })
    }

    fn gen_set_amp(&self, volts: f64) -> Result<(), HalError> {
        check("rp_GenAmp", unsafe { rp_GenAmp(RP_CH_1, volts as c_float) })
    }

    fn gen_set_phase_deg(&self, degrees: f64) -> Result<(), HalError> {
        check("rp_GenPhase", unsafe {
            rp_GenPhase(RP_CH_1, degrees as c_float)
        })
    }

    fn gen_enable(&self) -> Result<(), HalError> {
        check("rp_GenOutEnable", unsafe { rp_GenOutEnable(RP_CH_1) })
    }

    fn gen_disable(&self) -> Result<(), HalError> {
        check("rp_GenOutDisable", unsafe { rp_GenOutDisable(RP_CH_1) })
    }

    fn acq_reset(&self) -> Result<(), HalError> {
        check("rp_AcqReset", unsafe { rp_AcqReset() })
    }

    fn acq_set_decimation(&self, decimation: u32) -> Result<(), HalError> {
        let code = decimation_code(decimation)?;
        check("rp_AcqSetDecimation", unsafe { rp_AcqSetDecimation(code) })
    }

    fn acq_set_trigger_delay(&self, samples: u32) -> Result<(), HalError> {
        check("rp_AcqSetTriggerDelay", unsafe {
            rp_AcqSetTriggerDelay(samples as i32)
        })
    }

    fn acq_set_trigger_src(&self, source: TriggerSource) -> Result<(), HalError> {
        let code = match source {
            TriggerSource::Now => RP_TRIG_SRC_NOW,
            TriggerSource::ExternalPositiveEdge => RP_TRIG_SRC_EXT_PE,
        };
        check("rp_AcqSetTriggerSrc", unsafe { rp_AcqSetTriggerSrc(code) })
    }

    fn acq_start(&self) -> Result<(), HalError> {
        check("rp_AcqStart", unsafe { rp_AcqStart() })
    }

    fn acq_stop(&self) -> Result<(), HalError> {
        check("rp_AcqStop", unsafe { rp_AcqStop() })
    }

    fn acq_get_write_pointer(&self) -> Result<u32, HalError> {
        let mut pos = 0u32;
        check("rp_AcqGetWritePointer", unsafe {
            rp_AcqGetWritePointer(&mut pos)
        })?;
        Ok(pos)
    }

    fn acq_get_trigger_state(&self) -> Result<TriggerState, HalError> {
        let mut state = 0 as c_uint;
        check("rp_AcqGetTriggerState", unsafe {
            rp_AcqGetTriggerState(&mut state)
        })?;
        Ok(if state == RP_TRIG_STATE_TRIGGERED {
            TriggerState::Triggered
        } else {
            TriggerState::Idle
        })
    }

    fn acq_read_raw(
        &self,
        channel: InputChannel,
        start_pos: u32,
        dst: &mut [i16],
    ) -> Result<(), HalError> {
        if dst.len() > HW_RING as usize {
            return Err(HalError::ReadTooLong {
                count: dst.len() as u32,
            });
        }
        let hw_channel = match channel {
            InputChannel::Reference => RP_CH_1,
            InputChannel::Measurement => RP_CH_2,
        };
        let mut size = dst.len() as u32;
        check("rp_AcqGetDataRaw", unsafe {
            rp_AcqGetDataRaw(hw_channel, start_pos, &mut size, dst.as_mut_ptr())
        })
    }

    fn dio_set_direction(&self, pin: u8, direction: PinDirection) -> Result<(), HalError> {
        let code = match direction {
            PinDirection::Input => RP_IN,
            PinDirection::Output => RP_OUT,
        };
        check("rp_DpinSetDirection", unsafe {
            rp_DpinSetDirection(RP_DIO0_P + c_uint::from(pin), code)
        })
    }

    fn dio_set(&self, pin: u8, level: PinState) -> Result<(), HalError> {
        let state = match level {
            PinState::Low => 0,
            PinState::High => 1,
        };
        check("rp_DpinSetState", unsafe {
            rp_DpinSetState(RP_DIO0_P + c_uint::from(pin), state)
        })
    }

    fn ao_set(&self, channel: u32, volts: f64) -> Result<(), HalError> {
        if channel >= super::design_parameters::AO_CHANNELS {
            return Err(HalError::AoChannel(channel));
        }
        check("rp_AOpinSetValue", unsafe {
            rp_AOpinSetValue(channel, volts as c_float)
        })
    }
}
