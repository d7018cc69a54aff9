use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Conversations {
    Table,
    Id,
    ParticipantA,
    ParticipantB,
    RolesJson,
    LastMessage,
    LastMessageId,
    LastMessageReadBy,
    LastUpdated,
    CreatedAt,
    InitiatedBy,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000001_create_conversations_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Conversations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Conversations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Conversations::ParticipantA)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Conversations::ParticipantB)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Conversations::RolesJson)
                            .string()
                            .not_null()
                            .default("[]"),
                    )
                    .col(ColumnDef::new(Conversations::LastMessage).string())
                    .col(ColumnDef::new(Conversations::LastMessageId).string())
                    .col(ColumnDef::new(Conversations::LastMessageReadBy).string())
                    .col(
                        ColumnDef::new(Conversations::LastUpdated)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Conversations::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Conversations::InitiatedBy)
                            .string()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_conversations_participant_a")
                    .table(Conversations::Table)
                    .col(Conversations::ParticipantA)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_conversations_participant_b")
                    .table(Conversations::Table)
                    .col(Conversations::ParticipantB)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_conversations_last_updated")
                    .table(Conversations::Table)
                    .col(Conversations::LastUpdated)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Conversations::Table).to_owned())
            .await
    }
}
