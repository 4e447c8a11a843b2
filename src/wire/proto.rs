//! Protobuf messages exchanged between participants.

/// Top-level message, exactly one of the variants is set.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(oneof = "envelope::Msg", tags = "1, 2")]
    pub msg: ::core::option::Option<envelope::Msg>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Msg {
        #[prost(message, tag = "1")]
        SignatureShare(super::SignatureShareMsg),
        #[prost(message, tag = "2")]
        ShareRejected(super::ShareRejectedMsg),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignatureShareMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub turn_num: u64,
    #[prost(uint32, tag = "3")]
    pub participant: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub sig: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShareRejectedMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub turn_num: u64,
    #[prost(string, tag = "3")]
    pub reason: ::prost::alloc::string::String,
}
