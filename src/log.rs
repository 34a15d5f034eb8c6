use std::cmp;

/// Returns the indentation used for nested trace output.
pub(crate) fn indent(i: usize) -> &'static str {
    const SPACES: &str = "                                        ";
    &SPACES[0..cmp::min(i * 2, SPACES.len())]
}

// Defines a `t!` macro local to the enclosing function.
//
// `t!` logs at trace level, prefixed with the function's name, if
// `$TRACE` is true.  Rust does not allow `$(...)*` in a nested macro
// definition, so `t!` accepts a fixed number of arguments.
macro_rules! tracer {
    ( $TRACE:expr, $func:expr ) => {
        tracer!($TRACE, $func, 0)
    };
    ( $TRACE:expr, $func:expr, $indent:expr ) => {
        #[allow(unused_macros)]
        macro_rules! t {
            ( $fmt:expr ) => {
                if $TRACE {
                    ::log::trace!("{}{}: {}",
                                  crate::log::indent($indent), $func,
                                  format!($fmt))
                }
            };
            ( $fmt:expr, $a:expr ) => {
                if $TRACE {
                    ::log::trace!("{}{}: {}",
                                  crate::log::indent($indent), $func,
                                  format!($fmt, $a))
                }
            };
            ( $fmt:expr, $a:expr, $b:expr ) => {
                if $TRACE {
                    ::log::trace!("{}{}: {}",
                                  crate::log::indent($indent), $func,
                                  format!($fmt, $a, $b))
                }
            };
            ( $fmt:expr, $a:expr, $b:expr, $c:expr ) => {
                if $TRACE {
                    ::log::trace!("{}{}: {}",
                                  crate::log::indent($indent), $func,
                                  format!($fmt, $a, $b, $c))
                }
            };
            ( $fmt:expr, $a:expr, $b:expr, $c:expr, $d:expr ) => {
                if $TRACE {
                    ::log::trace!("{}{}: {}",
                                  crate::log::indent($indent), $func,
                                  format!($fmt, $a, $b, $c, $d))
                }
            };
        }
    };
}
