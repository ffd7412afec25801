pub mod ana_filt_bank_1;
pub mod lin2log;
pub mod macros;
pub mod sigm_q15;
pub mod sqrt_approx;
pub mod vad;
