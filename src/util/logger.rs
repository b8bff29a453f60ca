use std::fmt::{Debug, Display, Formatter};

use super::{Code, Log};

impl<T: Display> Display for Log<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Log::None => Ok(()),
            Log::Default(s) | Log::Success(s) | Log::Result(s) | Log::Verbose(s) => {
                write!(f, "{}", s)
            }
        }
    }
}

impl<T> Log<T> {
    /// Total order over trace levels; higher is more verbose.
    pub fn order(&self) -> u8 {
        match self {
            Log::None => 0,
            Log::Default(_) => 1,
            Log::Success(_) => 2,
            Log::Result(_) => 3,
            Log::Verbose(_) => 4,
        }
    }
}

impl<TL: Display> Log<TL> {
    /// Print a labelled `(value)` trace line at `pointer` if this logger's level
    /// is at least `Success`. A no-op in release builds.
    #[allow(unused_variables)]
    pub fn log_success<T: Debug>(&self, pointer: usize, value: &T, code: &Code) {
        #[cfg(debug_assertions)]
        if self.order() >= Log::Success(()).order() {
            println!(
                "[{}; success]: {:?} at {}",
                self,
                value,
                code.obtain_position(pointer)
            );
        }
    }

    /// Print a labelled failure trace line at `pointer` if this logger's level
    /// is at least `Result`. A no-op in release builds.
    #[allow(unused_variables)]
    pub fn log_failure(&self, pointer: usize, code: &Code) {
        #[cfg(debug_assertions)]
        if self.order() >= Log::Result(()).order() {
            println!("[{}; failure]: at {}", self, code.obtain_position(pointer));
        }
    }

    /// Print a free-form trace line if this logger's level is at least `Verbose`.
    #[allow(unused_variables)]
    pub fn log_verbose(&self, message: &str) {
        #[cfg(debug_assertions)]
        if self.order() >= Log::Verbose(()).order() {
            println!("[{}; verbose]: {}", self, message);
        }
    }
}
