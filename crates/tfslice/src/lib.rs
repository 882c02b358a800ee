//! # tfslice - cross-reference and slice terraform module trees
//!
//! ## Introduction for developers
//!
//! Read this to understand how `tfslice` works internally.
//!
//! ### Terms
//!
//! A terraform configuration is a directory of `*.tf` files, the *module*. Files are HCL:
//! - a file gets parsed as a `body`
//! - ...which is a list of `structures`, attributes (`key = value`) or blocks
//! - ...and the top-level blocks are the declarations we care about:
//!
//! ```hcl
//! variable "ami_id" {}                  # var.ami_id
//! locals { name = "web" }               # local.name
//! resource "aws_instance" "web" {       # aws_instance.web
//!   ami = var.ami_id
//! }
//! data "aws_ami" "ubuntu" {}            # data.aws_ami.ubuntu
//! module "net" { source = "./net" }     # module.net, loads ./net as nested module
//! output "id" {                         # output.id
//!   value = aws_instance.web.id
//! }
//! ```
//!
//! ### Loading
//!
//! see [module::ModuleTree::load] and [loader]
//!
//! Files are parsed with [hcl_edit] so every block keeps its byte span ([documents]).
//! Declarations are collected into a [module::Module]. Nested module calls are located
//! through the `terraform init` manifest ([manifest]) or as local paths, and loaded into the
//! same arena ([module::ModuleTree]), addressed by [module::ModuleId].
//!
//! Problems in the configuration are [diagnostics::Diagnostics], they never abort loading.
//!
//! ### Resolving references
//!
//! Every attribute expression is reduced to one [reference::AttributeReference]:
//!
//! | expression                           | reference                     |
//! |--------------------------------------|-------------------------------|
//! | `aws_subnet.a[0].id`                 | `aws_subnet.a.id`             |
//! | `local.vpc.cidr_block`               | whatever `local.vpc` resolves to, plus `cidr_block` |
//! | `module.net.cidr`                    | the `cidr` output resolved inside the `net` module |
//! | `var.enabled ? aws_eip.a.id : null`  | `aws_eip.a.id`                |
//! | `"${var.prefix}-web"`                | unresolved                    |
//!
//! see [expr] for the shapes and [resolve] for the rules.
//!
//! References to resources are also stored in the other direction: a resource knows which
//! attributes and outputs point at it. Variables know which resources they end up in,
//! across any number of module calls ([dataflow]).
//!
//! ### Slicing
//!
//! [graph::Graph] is the closure of blocks a selection of module calls (and all outputs)
//! requires. [extract::Extractor] copies the source text of such a closure into another
//! directory, keeping the original file layout.
//!
pub mod dataflow;
pub mod diagnostics;
pub mod documents;
pub mod expr;
pub mod extract;
pub mod graph;
pub mod loader;
pub mod manifest;
pub mod module;
pub mod reference;
pub mod resolve;
mod util;
pub mod value;
mod visit;
