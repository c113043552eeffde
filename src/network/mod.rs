pub mod link;

pub use link::*;

/*
    Links between members are point-to-point and reliable: every message
    handed to the network reaches each recipient exactly once. Nothing is
    dropped or duplicated. Each delivery is delayed independently, so two
    messages on the same link may arrive in either order and a broadcast
    reaches different members at different times. Ordering is restored on
    the receiving side by the causal delivery rule, never by the network.
*/
