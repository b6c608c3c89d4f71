//! Hand-rolled Protobuf bindings for the Substreams wire protocol.
//!
//! The messages below mirror `sf.substreams.v1` and `sf.substreams.rpc.v2`,
//! restricted to the fields a sink actually consumes. They are written by
//! hand with `prost` derives rather than generated from `.proto` files so the
//! crate builds without `protoc`; unknown fields sent by newer servers are
//! skipped by prost during decoding.

pub mod substreams {
    /// Types from `sf.substreams.v1`.
    pub mod v1 {
        /// The module graph shipped with every stream request.
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct Modules {
            #[prost(message, repeated, tag = "1")]
            pub modules: Vec<Module>,
            #[prost(message, repeated, tag = "2")]
            pub binaries: Vec<Binary>,
        }

        /// A WASM binary referenced by one or more modules.
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct Binary {
            #[prost(string, tag = "1")]
            pub r#type: String,
            #[prost(bytes = "vec", tag = "2")]
            pub content: Vec<u8>,
        }

        #[derive(Clone, PartialEq, prost::Message)]
        pub struct Module {
            #[prost(string, tag = "1")]
            pub name: String,
            #[prost(uint32, tag = "4")]
            pub binary_index: u32,
            #[prost(string, tag = "5")]
            pub binary_entrypoint: String,
            #[prost(message, repeated, tag = "6")]
            pub inputs: Vec<module::Input>,
            #[prost(message, optional, tag = "7")]
            pub output: Option<module::Output>,
            #[prost(uint64, tag = "8")]
            pub initial_block: u64,
            #[prost(oneof = "module::Kind", tags = "2, 3")]
            pub kind: Option<module::Kind>,
        }

        pub mod module {
            #[derive(Clone, PartialEq, prost::Oneof)]
            pub enum Kind {
                #[prost(message, tag = "2")]
                KindMap(KindMap),
                #[prost(message, tag = "3")]
                KindStore(KindStore),
            }

            /// A mapper module, the only kind a sink can consume as output.
            #[derive(Clone, PartialEq, prost::Message)]
            pub struct KindMap {
                #[prost(string, tag = "1")]
                pub output_type: String,
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct KindStore {
                #[prost(string, tag = "1")]
                pub update_policy: String,
                #[prost(string, tag = "2")]
                pub value_type: String,
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct Input {
                #[prost(oneof = "input::Input", tags = "1, 2, 3, 4")]
                pub input: Option<input::Input>,
            }

            pub mod input {
                #[derive(Clone, PartialEq, prost::Oneof)]
                pub enum Input {
                    #[prost(message, tag = "1")]
                    Source(Source),
                    #[prost(message, tag = "2")]
                    Map(Map),
                    #[prost(message, tag = "3")]
                    Store(Store),
                    #[prost(message, tag = "4")]
                    Params(Params),
                }

                #[derive(Clone, PartialEq, prost::Message)]
                pub struct Source {
                    #[prost(string, tag = "1")]
                    pub r#type: String,
                }

                #[derive(Clone, PartialEq, prost::Message)]
                pub struct Map {
                    #[prost(string, tag = "1")]
                    pub module_name: String,
                }

                #[derive(Clone, PartialEq, prost::Message)]
                pub struct Store {
                    #[prost(string, tag = "1")]
                    pub module_name: String,
                    #[prost(string, tag = "2")]
                    pub mode: String,
                }

                #[derive(Clone, PartialEq, prost::Message)]
                pub struct Params {
                    #[prost(string, tag = "1")]
                    pub value: String,
                }
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct Output {
                #[prost(string, tag = "1")]
                pub r#type: String,
            }
        }

        /// Chain clock attached to every block-scoped message.
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct Clock {
            #[prost(string, tag = "1")]
            pub id: String,
            #[prost(uint64, tag = "2")]
            pub number: u64,
            #[prost(message, optional, tag = "3")]
            pub timestamp: Option<prost_types::Timestamp>,
        }
    }

    /// Types from `sf.substreams.rpc.v2`.
    pub mod rpc {
        pub mod v2 {
            use crate::pb::substreams::v1::{Clock, Modules};

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct Request {
                #[prost(int64, tag = "1")]
                pub start_block_num: i64,
                #[prost(string, tag = "2")]
                pub start_cursor: String,
                #[prost(uint64, tag = "3")]
                pub stop_block_num: u64,
                #[prost(bool, tag = "4")]
                pub final_blocks_only: bool,
                #[prost(bool, tag = "5")]
                pub production_mode: bool,
                #[prost(string, tag = "6")]
                pub output_module: String,
                #[prost(message, optional, tag = "7")]
                pub modules: Option<Modules>,
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct Response {
                #[prost(oneof = "response::Message", tags = "1, 2, 3, 4, 10, 11")]
                pub message: Option<response::Message>,
            }

            pub mod response {
                #[derive(Clone, PartialEq, prost::Oneof)]
                pub enum Message {
                    #[prost(message, tag = "1")]
                    Session(super::SessionInit),
                    #[prost(message, tag = "2")]
                    Progress(super::ModulesProgress),
                    #[prost(message, tag = "3")]
                    BlockScopedData(super::BlockScopedData),
                    #[prost(message, tag = "4")]
                    BlockUndoSignal(super::BlockUndoSignal),
                    #[prost(message, tag = "10")]
                    DebugSnapshotData(super::InitialSnapshotData),
                    #[prost(message, tag = "11")]
                    DebugSnapshotComplete(super::InitialSnapshotComplete),
                }
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct SessionInit {
                #[prost(string, tag = "1")]
                pub trace_id: String,
                #[prost(uint64, tag = "2")]
                pub resolved_start_block: u64,
                #[prost(uint64, tag = "3")]
                pub linear_handoff_block: u64,
                #[prost(uint64, tag = "4")]
                pub max_parallel_workers: u64,
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct ModulesProgress {
                #[prost(message, repeated, tag = "2")]
                pub running_jobs: Vec<Job>,
                #[prost(message, repeated, tag = "3")]
                pub modules_stats: Vec<ModuleStats>,
                #[prost(message, repeated, tag = "4")]
                pub stages: Vec<Stage>,
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct Job {
                #[prost(uint32, tag = "1")]
                pub stage: u32,
                #[prost(uint64, tag = "2")]
                pub start_block: u64,
                #[prost(uint64, tag = "3")]
                pub stop_block: u64,
                #[prost(uint64, tag = "4")]
                pub processed_blocks: u64,
                #[prost(uint64, tag = "5")]
                pub duration_ms: u64,
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct ModuleStats {
                #[prost(string, tag = "1")]
                pub name: String,
                #[prost(uint64, tag = "2")]
                pub total_processed_block_count: u64,
                #[prost(uint64, tag = "3")]
                pub total_processing_time_ms: u64,
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct Stage {
                #[prost(string, repeated, tag = "1")]
                pub modules: Vec<String>,
                #[prost(message, repeated, tag = "2")]
                pub completed_ranges: Vec<BlockRange>,
            }

            /// A contiguous `[start_block, end_block]` span of processed blocks.
            #[derive(Clone, Copy, PartialEq, prost::Message)]
            pub struct BlockRange {
                #[prost(uint64, tag = "1")]
                pub start_block: u64,
                #[prost(uint64, tag = "2")]
                pub end_block: u64,
            }

            /// Output of the requested module at a single block, together with
            /// the cursor that resumes the stream right after this block.
            #[derive(Clone, PartialEq, prost::Message)]
            pub struct BlockScopedData {
                #[prost(message, optional, tag = "1")]
                pub output: Option<MapModuleOutput>,
                #[prost(message, optional, tag = "2")]
                pub clock: Option<Clock>,
                #[prost(string, tag = "3")]
                pub cursor: String,
                #[prost(uint64, tag = "4")]
                pub final_block_height: u64,
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct MapModuleOutput {
                #[prost(string, tag = "1")]
                pub name: String,
                #[prost(message, optional, tag = "2")]
                pub map_output: Option<prost_types::Any>,
            }

            /// Declares that every block above `last_valid_block` is forked out.
            #[derive(Clone, PartialEq, prost::Message)]
            pub struct BlockUndoSignal {
                #[prost(message, optional, tag = "1")]
                pub last_valid_block: Option<BlockRef>,
                #[prost(string, tag = "2")]
                pub last_valid_cursor: String,
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct BlockRef {
                #[prost(string, tag = "1")]
                pub id: String,
                #[prost(uint64, tag = "2")]
                pub number: u64,
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct InitialSnapshotData {
                #[prost(string, tag = "1")]
                pub module_name: String,
            }

            #[derive(Clone, PartialEq, prost::Message)]
            pub struct InitialSnapshotComplete {
                #[prost(string, tag = "1")]
                pub cursor: String,
            }

            /// Client for the `sf.substreams.rpc.v2.Stream` service, written in
            /// the same shape `tonic-build` emits.
            pub mod stream_client {
                #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
                use tonic::codegen::*;

                #[derive(Debug, Clone)]
                pub struct StreamClient<T> {
                    inner: tonic::client::Grpc<T>,
                }

                impl StreamClient<tonic::transport::Channel> {
                    /// Attempt to create a new client by connecting to a given endpoint.
                    pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
                    where
                        D: TryInto<tonic::transport::Endpoint>,
                        D::Error: Into<StdError>,
                    {
                        let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
                        Ok(Self::new(conn))
                    }
                }

                impl<T> StreamClient<T>
                where
                    T: tonic::client::GrpcService<tonic::body::BoxBody>,
                    T::Error: Into<StdError>,
                    T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
                    <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
                {
                    pub fn new(inner: T) -> Self {
                        let inner = tonic::client::Grpc::new(inner);
                        Self { inner }
                    }

                    /// Server-streaming call delivering block-scoped module
                    /// outputs, undo signals, progress and session messages.
                    pub async fn blocks(
                        &mut self,
                        request: impl tonic::IntoRequest<super::Request>,
                    ) -> std::result::Result<
                        tonic::Response<tonic::codec::Streaming<super::Response>>,
                        tonic::Status,
                    > {
                        self.inner.ready().await.map_err(|e| {
                            tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
                        })?;
                        let codec = tonic::codec::ProstCodec::default();
                        let path =
                            http::uri::PathAndQuery::from_static("/sf.substreams.rpc.v2.Stream/Blocks");
                        let mut req = request.into_request();
                        req.extensions_mut()
                            .insert(GrpcMethod::new("sf.substreams.rpc.v2.Stream", "Blocks"));
                        self.inner.server_streaming(req, path, codec).await
                    }
                }
            }
        }
    }
}
