// kitty-modeline: per-terminal status line rendered by an external prompt program
//
// Shell hooks push environment snapshots with `kitty-modeline-client`; the
// `kitty-modeline` daemon of the terminal renders the newest one.

pub mod modeline;

#[cfg(test)]
pub(crate) mod test_utils;
