// recdsl: a CST builder and tree-walking interpreter core for a small
// record-transformation DSL (think "one `put`/`filter` expression" in
// isolation from the surrounding CLI, readers, and writers).
//
// Copyright (C) 2019  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

pub mod ast;
pub mod cst;
pub mod driver;
pub mod emit;
pub mod error;
pub mod exec;
pub mod fmgr;
pub mod forloop;
pub mod frame;
pub mod keywords;
pub mod mlhmmv;
pub mod mlrval;
pub mod rval;
pub mod stack_allocate;
pub mod udf;
