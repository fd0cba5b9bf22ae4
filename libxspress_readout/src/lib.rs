//! # xspress_readout
//!
//! xspress_readout is the readout pipeline for Xspress multi-element energy-dispersive
//! detectors, written in Rust. It pulls raw scaler and spectrum words for a window of frames
//! from the detector, decodes them into per-element arrays, applies dead-time correction and
//! assembles one record per frame in the selected readout mode (scalers only, full MCA, or
//! regions of interest).
//!
//! ## Installation
//!
//! Currently the only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./xspress_readout_cli` from the
//! top level xspress_readout repository. The binary will be installed to your cargo install
//! location (typically something like `~/.cargo/bin/`).
//!
//! ## Library layout
//!
//! - [decoder]: transport words to `[frame][element][counter]` scalers and
//!   `[frame][element][grade][bin]` spectra
//! - [deadtime]: scaler and spectrum correction for the cubic and ratio models, plus live
//!   rate statistics
//! - [window]: the acquisition state machine and the frame window cursor
//! - [registry]: per-element configuration, validated and frozen at arm time
//! - [roi]: region extraction from packed ROI spectra
//! - [assembler]: corrected frame records for each readout mode
//! - [detector]: ties the above to a [Transport](transport::Transport) and
//!   [Sequencer](transport::Sequencer)
//! - [replay]: a transport and sequencer serving recorded dumps
//! - [sink]: consumers of frame records
//!
//! ## Configuration
//!
//! The CLI replays recorded scaler (and optionally spectrum) dumps through the full pipeline.
//! The YAML format of a configuration file is as follows (one element shown):
//!
//! ```yml
//! scaler_path: /path/to/scalers.bin
//! spectrum_path: null
//! output_path: /path/to/output.txt
//! n_frames: 100
//! max_words_per_transfer: 1048576
//! read_timeout_ms: 5000
//! detector:
//!   elements:
//!   - index: 0
//!     name: element0
//!     window_low: 0
//!     window_high: 4095
//!     excluded: false
//!     deadtime:
//!       model: Ratio
//!       alpha: 3.4e-7
//!       beta: 0.0
//!       tau: 1.8e-7
//!     regions: []
//!   mode: ScalersOnly
//!   grade: None
//!   region_type: VirtualScaler
//!   deadtime_model: Ratio
//!   save_raw_spectrum: false
//!   sum_all_elements: false
//!   full_mca_bits: 12
//!   clock_period: 1.25e-8
//!   deadtime_energy: 0.0
//!   controls:
//!     only_ff: false
//!     include_raw_counters: false
//!     always_record_raw_spectra: false
//! ```
//!
//! Dumps are the raw transport words of consecutive frames, written as big-endian 32-bit
//! integers. If `spectrum_path` is `null` only SCALERS_ONLY readout can be replayed.
//!
//! ## Output
//!
//! The CLI will output two files: a tab separated text file with one row per frame, and a
//! log file. The columns are the corrected element values, the combined `FF` value, region
//! totals in ROI mode, and the raw counters when `include_raw_counters` is set. Per-element
//! faults (corrupt frames, undefined rates) are reported in the log file.
pub mod assembler;
pub mod config;
pub mod constants;
pub mod deadtime;
pub mod decoder;
pub mod detector;
pub mod error;
pub mod parameters;
pub mod process;
pub mod registry;
pub mod replay;
pub mod roi;
pub mod sink;
pub mod transport;
pub mod window;
pub mod worker_status;
