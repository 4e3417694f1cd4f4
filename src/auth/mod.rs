//! Request authentication for remote runtimes ("tangents").

mod tangent;

pub use tangent::{
    SIGNATURE_HEADER, TANGENT_ID_HEADER, TIMESTAMP_HEADER, TangentAuth, string_to_sign,
    tangent_auth,
};
