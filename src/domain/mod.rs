// Domain layer: core models, the posting schema and ports (interfaces).

pub mod model;
pub mod ports;
pub mod posting;
