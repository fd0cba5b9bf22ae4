//Scaler counters reported per element per frame
pub const SCALERS_PER_ELEMENT: usize = 4;
pub const TOTAL_COUNT_OFFSET: usize = 0;
pub const RESET_COUNT_OFFSET: usize = 1;
pub const IN_WINDOW_COUNT_OFFSET: usize = 2;
pub const LIVE_CLOCK_OFFSET: usize = 3;

//Timing
pub const DEFAULT_CLOCK_PERIOD: f64 = 12.5e-9; //seconds per live clock tick
pub const RESET_TICK: f64 = 1.0e-7; //seconds of dead time per reset

//Spectrum sizes
pub const DEFAULT_FULL_MCA_BITS: u32 = 12;
pub const MAX_MCA_BITS: u32 = 16;

//Resolution grades
pub const NO_GRADE_SLICES: usize = 1;
pub const THRESHOLD_GRADE_SLICES: usize = 2;
pub const ALL_GRADE_SLICES: usize = 16;
pub const MAX_GRADE_THRESHOLD: u8 = 16;
pub const THRESHOLD_BAD_SLICE: usize = 0;
pub const THRESHOLD_GOOD_SLICE: usize = 1;
pub const BEST_EIGHT_GRADE_BIN: usize = 7; //cumulative bin summing the 8 best grades
pub const FIRST_PEAK_GRADE: usize = 8; //partial spectra sum grades 8..=15

//Transfers
pub const DEFAULT_MAX_WORDS_PER_TRANSFER: usize = 1_048_576;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;
pub const BYTES_PER_WORD: usize = 4;

//Column names
pub const FF_NAME: &str = "FF";
pub const FF_BAD_NAME: &str = "FF_bad";
pub const OUT_REGION_NAME: &str = "OUT";
